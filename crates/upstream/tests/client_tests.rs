//! Upstream client tests against a mock HTTP server.

use depot_core::config::UpstreamConfig;
use depot_upstream::{ByteRange, ItemKind, UpstreamClient};
use futures::TryStreamExt;
use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::json;

fn client_for(server: &MockServer) -> UpstreamClient {
    let config = UpstreamConfig {
        host: server.host(),
        port: server.port(),
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        ..Default::default()
    };
    UpstreamClient::new(&config, reqwest::Client::new())
}

#[tokio::test]
async fn list_sends_auth_headers_and_pagination() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/resource/abc/list")
                .query_param("limit", "100")
                .query_param("offset", "200")
                .query_param("path", "/")
                .query_param("output", "list")
                .header("x-api-key", "test-key")
                .header_exists("x-token");
            then.status(200).json_body(json!({
                "items": [
                    {"id": "i1", "path": "/a", "size": 1024, "type": "file"},
                    {"id": "i2", "path": "/sub", "size": 0, "type": "dir"}
                ],
                "count": 202
            }));
        })
        .await;

    let client = client_for(&server);
    let listing = client.list_resource_content("abc", 100, 200).await.unwrap();

    mock.assert_async().await;
    assert_eq!(listing.count, 202);
    assert_eq!(listing.items.len(), 2);
    assert_eq!(listing.items[0].kind, ItemKind::File);
    assert_eq!(listing.items[0].size, 1024);
    assert_eq!(listing.items[1].kind, ItemKind::Dir);
}

#[tokio::test]
async fn list_unknown_resource_is_empty() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/resource/ghost/list");
            then.status(404);
        })
        .await;

    let client = client_for(&server);
    let listing = client.list_resource_content("ghost", 100, 0).await.unwrap();
    assert!(listing.items.is_empty());
    assert_eq!(listing.count, 0);
}

#[tokio::test]
async fn export_yields_download_url() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/resource/abc/export/i1");
            then.status(200).json_body(json!({
                "export_items": {"download": {"url": "http://cdn.example/abc/a"}}
            }));
        })
        .await;

    let client = client_for(&server);
    let export = client.export_resource_content("abc", "i1").await.unwrap();
    assert_eq!(export.download_url(), Some("http://cdn.example/abc/a"));
}

#[tokio::test]
async fn forbidden_surfaces_as_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/resource/abc/list");
            then.status(403);
        })
        .await;

    let client = client_for(&server);
    let err = client
        .list_resource_content("abc", 100, 0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("forbidden"));
}

#[tokio::test]
async fn error_envelope_is_surfaced() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/resource/abc/list");
            then.status(500).json_body(json!({"error": "listing exploded"}));
        })
        .await;

    let client = client_for(&server);
    let err = client
        .list_resource_content("abc", 100, 0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("listing exploded"));
}

#[tokio::test]
async fn download_forwards_range_header() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/dl/a")
                .header("range", "bytes=0-511");
            then.status(206).body(vec![7u8; 512]);
        })
        .await;

    let client = client_for(&server);
    let url = format!("{}/dl/a", server.base_url());
    let stream = client
        .download(&url, Some(ByteRange::to_exclusive(0, 512)))
        .await
        .unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    let body = chunks.concat();

    mock.assert_async().await;
    assert_eq!(body.len(), 512);
    assert!(body.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn download_without_range_has_no_range_header() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/dl/b");
            then.status(200).body(b"whole file");
        })
        .await;

    let client = client_for(&server);
    let url = format!("{}/dl/b", server.base_url());
    let stream = client.download(&url, None).await.unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), b"whole file");
}
