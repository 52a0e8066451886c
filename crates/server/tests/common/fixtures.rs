//! Test fixtures: mock upstream wiring and fingerprint helpers.

use depot_core::fingerprint::FingerprintBuilder;
use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::json;

/// A file served by the mock upstream.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[derive(Clone)]
#[allow(dead_code)]
pub struct UpstreamFile {
    pub item_id: String,
    pub path: String,
    pub content: Vec<u8>,
}

#[allow(dead_code)]
impl UpstreamFile {
    pub fn new(item_id: &str, path: &str, content: Vec<u8>) -> Self {
        Self {
            item_id: item_id.to_string(),
            path: path.to_string(),
            content,
        }
    }

    /// The fingerprint this file stores under (all fixtures are small
    /// enough to hash whole).
    pub fn hash(&self) -> String {
        fingerprint_of(&self.content)
    }
}

/// Fingerprint of a small in-memory payload.
#[allow(dead_code)]
pub fn fingerprint_of(content: &[u8]) -> String {
    let mut builder = FingerprintBuilder::new(content.len() as u64);
    builder.update(content);
    builder.finish().to_hex()
}

/// Deterministic pseudo-random content.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }
    data
}

/// Mock a single listing page carrying all the given files.
#[allow(dead_code)]
pub async fn mock_listing(server: &MockServer, resource_id: &str, files: &[UpstreamFile]) {
    let items: Vec<_> = files
        .iter()
        .map(|file| {
            json!({
                "id": file.item_id,
                "path": file.path,
                "size": file.content.len(),
                "type": "file"
            })
        })
        .collect();
    let count = files.len();
    let list_path = format!("/resource/{resource_id}/list");

    server
        .mock_async(move |when, then| {
            when.method(GET).path(list_path);
            then.status(200)
                .json_body(json!({ "items": items, "count": count }));
        })
        .await;
}

/// Mock the export and download endpoints of one file.
#[allow(dead_code)]
pub async fn mock_file_endpoints(server: &MockServer, resource_id: &str, file: &UpstreamFile) {
    let download_path = format!("/dl/{resource_id}/{}", file.item_id);
    let download_url = format!("{}{}", server.base_url(), download_path);
    let export_path = format!("/resource/{resource_id}/export/{}", file.item_id);

    server
        .mock_async(move |when, then| {
            when.method(GET).path(export_path);
            then.status(200).json_body(json!({
                "export_items": { "download": { "url": download_url } }
            }));
        })
        .await;

    let content = file.content.clone();
    server
        .mock_async(move |when, then| {
            when.method(GET).path(download_path);
            then.status(200).body(content);
        })
        .await;
}

/// Mock an export endpoint that fails, simulating a mid-store upstream
/// error. Returns the mock so tests can delete it to "repair" the
/// upstream.
#[allow(dead_code)]
pub async fn mock_failing_export<'a>(
    server: &'a MockServer,
    resource_id: &str,
    item_id: &str,
) -> httpmock::Mock<'a> {
    let export_path = format!("/resource/{resource_id}/export/{item_id}");
    server
        .mock_async(move |when, then| {
            when.method(GET).path(export_path);
            then.status(500)
                .json_body(json!({ "error": "export exploded" }));
        })
        .await
}

/// Wire a complete healthy resource: listing plus per-file endpoints.
#[allow(dead_code)]
pub async fn mock_resource(server: &MockServer, resource_id: &str, files: &[UpstreamFile]) {
    mock_listing(server, resource_id, files).await;
    for file in files {
        mock_file_endpoints(server, resource_id, file).await;
    }
}
