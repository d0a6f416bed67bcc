#![allow(dead_code)]

use rust_video_harvester::bot_challenge::BotChallengeDetector;
use rust_video_harvester::http_client::{EnhancedHttpClient, HttpClientConfig};
use rust_video_harvester::session_pool::SessionPool;
use rust_video_harvester::throttle::{RequestThrottle, ThrottleConfig};
use rust_video_harvester::user_agents::UserAgentPool;
use std::sync::Arc;
use std::time::Duration;

pub fn client() -> Arc<EnhancedHttpClient> {
    let sessions = Arc::new(
        SessionPool::new(Arc::new(UserAgentPool::new()), 2, Duration::from_secs(300))
            .expect("session pool"),
    );
    Arc::new(EnhancedHttpClient::new(
        sessions,
        Arc::new(BotChallengeDetector::new()),
        HttpClientConfig {
            timeout: Duration::from_secs(2),
            referer: None,
        },
    ))
}

/// Throttle that never sleeps
pub fn instant_throttle() -> Arc<RequestThrottle> {
    Arc::new(
        RequestThrottle::new(ThrottleConfig {
            min_delay: 0.0,
            max_delay: 0.0,
            enable_jitter: false,
            ..ThrottleConfig::default()
        })
        .expect("throttle"),
    )
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 3, image::Rgba([200, 10, 10, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).expect("encode png");
    out.into_inner()
}
