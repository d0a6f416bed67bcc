//! Detection of bot-verification pages in place of real responses

use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

const DEFAULT_KEYWORDS: &[&str] = &[
    "验证码",
    "captcha",
    "verify",
    "verification",
    "安全验证",
    "人机验证",
    "请验证",
    "please verify",
    "滑动验证",
    "滑块验证",
    "点击验证",
    "图片验证",
    "请输入验证码",
    "请完成验证",
    "security check",
];

const URL_INDICATORS: &[&str] = &["captcha", "verify", "verification", "validate"];

fn structural_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)<img[^>]*captcha[^>]*>",
            r"(?i)<div[^>]*slider[^>]*>",
            r"(?i)<div[^>]*verify[^>]*>",
            r#"(?i)class=["'][^"']*captcha[^"']*["']"#,
            r#"(?i)id=["'][^"']*captcha[^"']*["']"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChallengeKind {
    Slider,
    Image,
    Click,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub total_checks: u64,
    pub detections: u64,
}

type AlertCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct BotChallengeDetector {
    keywords: Mutex<Vec<String>>,
    on_alert: AlertCallback,
    total_checks: AtomicU64,
    detections: AtomicU64,
}

impl BotChallengeDetector {
    pub fn new() -> Self {
        Self::with_alert(Box::new(|message: &str| {
            log::warn!("Bot challenge detected: {}", message)
        }))
    }

    pub fn with_alert(on_alert: AlertCallback) -> Self {
        Self {
            keywords: Mutex::new(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()),
            on_alert,
            total_checks: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    fn keywords(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.keywords.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true and raises an alert if any signal is present
    pub fn detect(&self, body: Option<&str>, url: Option<&str>, status: Option<u16>) -> bool {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        let reason = self.find_signal(body, url, status);
        match reason {
            Some(reason) => {
                self.detections.fetch_add(1, Ordering::Relaxed);
                let location = url.unwrap_or("<unknown url>");
                (self.on_alert)(&format!("{} ({})", reason, location));
                true
            }
            None => false,
        }
    }

    fn find_signal(&self, body: Option<&str>, url: Option<&str>, status: Option<u16>) -> Option<String> {
        if status == Some(403) {
            return Some("HTTP 403".to_string());
        }
        if let Some(url) = url {
            let lowered = url.to_lowercase();
            if let Some(hit) = URL_INDICATORS.iter().find(|i| lowered.contains(*i)) {
                return Some(format!("url contains {:?}", hit));
            }
        }
        let body = body?;
        let lowered = body.to_lowercase();
        if let Some(hit) = self
            .keywords()
            .iter()
            .find(|k| lowered.contains(&k.to_lowercase()))
        {
            return Some(format!("keyword {:?}", hit));
        }
        structural_patterns()
            .iter()
            .find(|re| re.is_match(body))
            .map(|re| format!("pattern {}", re.as_str()))
    }

    /// Rough classification of a challenge page
    pub fn challenge_kind(&self, body: &str) -> ChallengeKind {
        let lowered = body.to_lowercase();
        if lowered.contains("slider") || body.contains("滑动") || body.contains("滑块") {
            ChallengeKind::Slider
        } else if lowered.contains("click") || body.contains("点击") {
            ChallengeKind::Click
        } else if (lowered.contains("<img") && lowered.contains("captcha")) || body.contains("图片") {
            ChallengeKind::Image
        } else {
            ChallengeKind::Unknown
        }
    }

    pub fn add_keyword(&self, keyword: &str) {
        let mut keywords = self.keywords();
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }

    pub fn remove_keyword(&self, keyword: &str) -> bool {
        let mut keywords = self.keywords();
        let before = keywords.len();
        keywords.retain(|k| k != keyword);
        keywords.len() != before
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }
}

impl Default for BotChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}
