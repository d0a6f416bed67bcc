mod common;

use rust_video_harvester::error::FetchError;
use rust_video_harvester::models::VideoId;
use rust_video_harvester::sources::detail::DetailSource;
use rust_video_harvester::sources::page::PageSource;
use rust_video_harvester::sources::search::SearchSource;
use rust_video_harvester::sources::MetadataSource;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn id() -> VideoId {
    VideoId::parse("BV1XCffBPEj4").unwrap()
}

#[tokio::test]
async fn test_detail_maps_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/wbi/view/detail"))
        .and(query_param("bvid", "BV1XCffBPEj4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"View": {
                "bvid": "BV1XCffBPEj4",
                "title": " Launch stream ",
                "desc": "first broadcast",
                "pubdate": 1704153600,
                "pic": "//i0.hdslb.com/bfs/archive/abc.jpg",
                "duration": 245,
                "stat": {"view": 1234, "danmaku": 56},
                "owner": {"mid": 1, "name": "Tiantong"}
            }}
        })))
        .mount(&server)
        .await;

    let source = DetailSource::with_base_url(common::client(), server.uri());
    let record = source.fetch(&id()).await.unwrap();
    assert_eq!(record.title, "Launch stream");
    assert_eq!(record.publish_date, "2024-01-02");
    assert_eq!(record.views, 1234);
    assert_eq!(record.danmaku, 56);
    assert_eq!(record.author, "Tiantong");
    assert_eq!(record.cover_url, "https://i0.hdslb.com/bfs/archive/abc.jpg");
    assert_eq!(record.duration, "04:05");
    assert!(record.missing_required().is_empty());
}

#[tokio::test]
async fn test_detail_error_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": -412, "message": "请求被拦截"})))
        .mount(&server)
        .await;

    let source = DetailSource::with_base_url(common::client(), server.uri());
    let err = source.fetch(&id()).await.unwrap_err();
    assert!(matches!(err, FetchError::RateLimited(_)));
}

#[tokio::test]
async fn test_detail_for_other_video_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"View": {"bvid": "BV1zz411z7zz", "title": "other"}}
        })))
        .mount(&server)
        .await;

    let source = DetailSource::with_base_url(common::client(), server.uri());
    assert!(matches!(source.fetch(&id()).await, Err(FetchError::Malformed(_))));
}

#[tokio::test]
async fn test_search_requires_exact_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/search/type"))
        .and(query_param("keyword", "BV1XCffBPEj4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"result": [
                {"bvid": "BV1other11111", "title": "near miss"},
                {"bvid": "bv1xcffbpej4", "title": "<em class=\"keyword\">Launch</em> stream",
                 "author": "Tiantong", "pubdate": 1704153600, "play": 9, "video_review": 1,
                 "pic": "//i0.hdslb.com/x.jpg", "duration": "4:05"}
            ]}
        })))
        .mount(&server)
        .await;

    let source = SearchSource::with_base_url(common::client(), server.uri());
    let record = source.fetch(&id()).await.unwrap();
    assert_eq!(record.id.as_str(), "BV1XCffBPEj4");
    assert_eq!(record.title, "Launch stream");
    assert_eq!(record.duration, "04:05");
    assert_eq!(record.views, 9);
}

#[tokio::test]
async fn test_search_without_match_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"result": [{"bvid": "BV1other11111", "title": "near miss"}]}
        })))
        .mount(&server)
        .await;

    let source = SearchSource::with_base_url(common::client(), server.uri());
    assert!(matches!(source.fetch(&id()).await, Err(FetchError::NotFound(_))));
}

#[tokio::test]
async fn test_page_source_reads_rendered_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/BV1XCffBPEj4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(
                    r#"<html><head><meta property="og:title" content="Launch stream_哔哩哔哩_bilibili">
                    <meta itemprop="uploadDate" content="2024-01-02 10:00:00"></head></html>"#,
                ),
        )
        .mount(&server)
        .await;

    let source = PageSource::with_base_url(common::client(), server.uri());
    let record = source.fetch(&id()).await.unwrap();
    assert_eq!(record.title, "Launch stream");
    assert_eq!(record.publish_date, "2024-01-02");
}

#[tokio::test]
async fn test_page_source_propagates_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = PageSource::with_base_url(common::client(), server.uri());
    let err = source.fetch(&id()).await.unwrap_err();
    assert!(err.is_retryable());
}
