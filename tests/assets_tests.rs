mod common;

use rust_video_harvester::assets::{AssetConfig, AssetDownloader};
use rust_video_harvester::models::TimelineEntry;
use rust_video_harvester::throttle::RequestThrottle;
use rust_video_harvester::timeline::TimelineMerger;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader(transcode: bool) -> AssetDownloader {
    paced_downloader(transcode, common::instant_throttle())
}

fn paced_downloader(transcode: bool, throttle: Arc<RequestThrottle>) -> AssetDownloader {
    AssetDownloader::new(
        common::client(),
        throttle,
        AssetConfig {
            max_workers: 2,
            enable_transcode: transcode,
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        },
    )
}

fn entry(bv: &str, cover_url: &str) -> TimelineEntry {
    TimelineEntry {
        id: "1".to_string(),
        date: "2024-01-02".to_string(),
        title: format!("video {}", bv),
        video_url: format!("https://www.bilibili.com/video/{}", bv),
        cover: format!("{}.jpg", bv),
        cover_url: cover_url.to_string(),
        bv: bv.to_string(),
        ..TimelineEntry::default()
    }
}

#[tokio::test]
async fn test_existing_local_cover_skips_download_and_relinks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(common::png_bytes()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("BV1ab411c7de.webp"), b"already here").unwrap();

    let mut entries = vec![entry("BV1ab411c7de", &format!("{}/cover.png", server.uri()))];
    let summary = downloader(true).fill_covers(&mut entries, dir.path()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.relinked, 1);
    assert_eq!(entries[0].cover, "BV1ab411c7de.webp");
}

#[tokio::test]
async fn test_download_transcodes_to_webp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bfs/archive/cover.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(common::png_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("{}/bfs/archive/cover.png", server.uri());
    // Same video twice in the artifact: one download, both entries linked
    let mut entries = vec![entry("BV1ab411c7de", &url), entry("bv1ab411c7de", &url)];
    let summary = downloader(true).fill_covers(&mut entries, dir.path()).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(entries[0].cover, "BV1ab411c7de.webp");
    assert_eq!(entries[1].cover, "BV1ab411c7de.webp");

    let written = std::fs::read(dir.path().join("BV1ab411c7de.webp")).unwrap();
    let format = image::guess_format(&written).unwrap();
    assert_eq!(format, image::ImageFormat::WebP);
    assert!(!dir.path().join("BV1ab411c7de.png.part").exists());
}

#[tokio::test]
async fn test_undecodable_image_keeps_original() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not an image".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut entries = vec![entry("BV1ab411c7de", &format!("{}/c.jpg", server.uri()))];
    let summary = downloader(true).fill_covers(&mut entries, dir.path()).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(entries[0].cover, "BV1ab411c7de.jpg");
    assert!(dir.path().join("BV1ab411c7de.jpg").exists());
    assert!(!dir.path().join("BV1ab411c7de.webp").exists());
}

#[tokio::test]
async fn test_missing_remote_url_counts_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = vec![entry("BV1ab411c7de", "")];
    let summary = downloader(false).fill_covers(&mut entries, dir.path()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.relinked, 0);
    assert_eq!(entries[0].cover, "BV1ab411c7de.jpg");
}

#[tokio::test]
async fn test_not_found_cover_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut entries = vec![entry("BV1ab411c7de", &format!("{}/c.jpg", server.uri()))];
    let summary = downloader(false).fill_covers(&mut entries, dir.path()).await.unwrap();
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_sync_artifact_saves_only_when_relinked() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("timeline.json");
    let covers = dir.path().join("thumbs");
    std::fs::create_dir_all(&covers).unwrap();
    std::fs::write(covers.join("BV1ab411c7de.jpg"), b"jpeg").unwrap();

    TimelineMerger::save_artifact(&artifact, &[entry("BV1ab411c7de", "")]).unwrap();
    let before = std::fs::read(&artifact).unwrap();

    let summary = downloader(true).sync_artifact(&artifact, &covers).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.relinked, 0);
    assert_eq!(std::fs::read(&artifact).unwrap(), before);
}

#[tokio::test]
async fn test_downloads_report_to_shared_throttle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(common::png_bytes()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let throttle = common::instant_throttle();
    let dir = tempfile::tempdir().unwrap();
    let mut entries = vec![
        entry("BV1ab411c7de", &format!("{}/ok.png", server.uri())),
        entry("BV1zz411z7zz", &format!("{}/busy.png", server.uri())),
    ];
    let summary = paced_downloader(false, throttle.clone())
        .fill_covers(&mut entries, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);
    let stats = throttle.stats();
    assert_eq!(stats.success_count, 1);
    // both attempts on the busy cover count against the pacer
    assert_eq!(stats.failure_count, 2);
}
