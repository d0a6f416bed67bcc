mod common;

use async_trait::async_trait;
use rust_video_harvester::config::DataTypeConfig;
use rust_video_harvester::discovery::{CollectionDiscoverer, Discover, HttpPageRenderer, PageRenderer};
use rust_video_harvester::error::{FetchError, HarvestError};
use serde_json::json;
use std::path::PathBuf;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedRenderer(Result<String, FetchError>);

#[async_trait]
impl PageRenderer for FixedRenderer {
    async fn render(&self, _url: &str) -> Result<String, FetchError> {
        self.0.clone()
    }
}

fn discoverer(api: &MockServer, renderer: Box<dyn PageRenderer>) -> CollectionDiscoverer {
    CollectionDiscoverer::with_api_base(
        common::client(),
        common::instant_throttle(),
        renderer,
        api.uri(),
    )
}

fn data_type(collection_url: Option<String>, identifier_file: Option<PathBuf>) -> DataTypeConfig {
    DataTypeConfig {
        name: "lvjiang".to_string(),
        collection_url,
        identifier_file,
        artifact_path: PathBuf::from("timeline.json"),
        cover_dir: PathBuf::from("thumbs"),
    }
}

fn page(bvids: &[&str], has_more: bool, count: usize) -> serde_json::Value {
    json!({
        "code": 0,
        "message": "0",
        "data": {
            "info": {"media_count": count},
            "medias": bvids.iter().map(|b| json!({"bvid": b})).collect::<Vec<_>>(),
            "has_more": has_more
        }
    })
}

#[tokio::test]
async fn test_favorites_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/list"))
        .and(query_param("media_id", "3390448373"))
        .and(query_param("pn", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["BV1aaaaaaaaa", "BV1bbbbbbbbb"], true, 3)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/list"))
        .and(query_param("pn", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["BV1ccccccccc"], false, 3)))
        .expect(1)
        .mount(&server)
        .await;

    let d = discoverer(&server, Box::new(FixedRenderer(Ok(String::new()))));
    let ids = d
        .discover_collection("https://space.bilibili.com/4176573/favlist?fid=3390448373&ftype=create")
        .await
        .unwrap();
    let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
    assert_eq!(ids, vec!["BV1aaaaaaaaa", "BV1bbbbbbbbb", "BV1ccccccccc"]);
}

#[tokio::test]
async fn test_api_error_falls_back_to_page_scrape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": -403, "message": "private"})))
        .mount(&server)
        .await;

    let html = r#"<a href="//www.bilibili.com/video/BV1ddddddddd/">one</a>"#.to_string();
    let d = discoverer(&server, Box::new(FixedRenderer(Ok(html))));
    let ids = d
        .discover_collection("https://space.bilibili.com/1/favlist?fid=42")
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0].as_str(), "BV1ddddddddd");
}

#[tokio::test]
async fn test_page_without_media_id_is_scraped_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/space/videos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(r#"<a href="/video/BV1eeeeeeeee">e</a><a href="/video/BV1fffffffff">f</a>"#),
        )
        .mount(&server)
        .await;

    let d = discoverer(&server, Box::new(HttpPageRenderer::new(common::client())));
    let ids = d
        .discover_collection(&format!("{}/space/videos", server.uri()))
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn test_identifier_file_is_unioned_with_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["BV1aaaaaaaaa"], false, 1)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("bv.txt");
    std::fs::write(&list, "bv1aaaaaaaaa\nBV1ggggggggg\n").unwrap();

    let d = discoverer(&server, Box::new(FixedRenderer(Ok(String::new()))));
    let ids = d
        .discover(&data_type(Some("https://space.bilibili.com/1/favlist?fid=7".into()), Some(list)))
        .await
        .unwrap();
    let ids: Vec<String> = ids.iter().map(|i| i.key()).collect();
    assert_eq!(ids, vec!["BV1AAAAAAAAA", "BV1GGGGGGGGG"]);
}

#[tokio::test]
async fn test_collection_failure_tolerated_when_file_supplies_ids() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("bv.txt");
    std::fs::write(&list, "BV1hhhhhhhhh\n").unwrap();

    let renderer = FixedRenderer(Err(FetchError::Transient("connection reset".into())));
    let d = discoverer(&server, Box::new(renderer));
    let ids = d
        .discover(&data_type(Some("https://space.bilibili.com/1".into()), Some(list)))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_collection_failure_fatal_without_other_ids() {
    let server = MockServer::start().await;
    let renderer = FixedRenderer(Err(FetchError::Transient("connection reset".into())));
    let d = discoverer(&server, Box::new(renderer));
    let result = d
        .discover(&data_type(Some("https://space.bilibili.com/1".into()), None))
        .await;
    assert!(matches!(result, Err(HarvestError::Discovery(_))));
}
