//! Test environment: SQLite metadata, filesystem blobs, mock upstream.

use depot_core::config::{AppConfig, UpstreamConfig};
use depot_core::ResourceStatus;
use depot_metadata::{ClaimOutcome, MetadataStore, ResourceRepo, SqliteStore};
use depot_server::worker::Job;
use depot_server::{create_router, AppState, Worker};
use depot_storage::{BlobStore, FilesystemBackend};
use depot_upstream::UpstreamClient;
use httpmock::MockServer;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// A full in-process test environment.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestEnv {
    pub router: axum::Router,
    pub state: AppState,
    pub sqlite: Arc<SqliteStore>,
    pub upstream: MockServer,
    pub blob_dir: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    /// Create a new environment with temporary storage and a mock upstream.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let upstream_server = MockServer::start_async().await;

        let db_path = temp_dir.path().join("metadata.db");
        let sqlite = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();

        let blob_dir = temp_dir.path().join("blobs");
        let blobs: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(&blob_dir)
                .await
                .expect("failed to create blob store"),
        );

        let upstream_config = UpstreamConfig {
            host: upstream_server.host(),
            port: upstream_server.port(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            ..Default::default()
        };
        let upstream = UpstreamClient::new(&upstream_config, reqwest::Client::new());

        let config = AppConfig {
            upstream: upstream_config,
            ..Default::default()
        };

        let state = AppState::new(config, metadata, blobs, upstream);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            sqlite,
            upstream: upstream_server,
            blob_dir,
            _temp_dir: temp_dir,
        }
    }

    /// A worker bound to a fresh shutdown token.
    pub fn worker(&self) -> Worker {
        Worker::new(self.state.clone(), CancellationToken::new())
    }

    /// Rewind a resource's `updated_at` so it looks due to the dispatcher.
    pub async fn backdate_resource(&self, id: &str, secs: i64) {
        let past = OffsetDateTime::now_utc() - time::Duration::seconds(secs);
        sqlx::query("UPDATE resource SET updated_at = ? WHERE resource_id = ?")
            .bind(past)
            .bind(id)
            .execute(self.sqlite.pool())
            .await
            .expect("failed to backdate resource");
    }

    /// Claim a queued resource the way the dispatcher would and return the
    /// job a worker should run.
    pub async fn claim(&self, id: &str, target: ResourceStatus) -> Job {
        let row = self
            .state
            .metadata
            .get_resource(id)
            .await
            .expect("failed to load resource")
            .expect("resource missing");
        let outcome = self
            .state
            .metadata
            .claim_for_processing(id, row.updated_at, target)
            .await
            .expect("claim failed");
        assert_eq!(outcome, ClaimOutcome::Claimed, "expected to claim {id}");
        Job {
            resource_id: id.to_string(),
            target,
        }
    }

    /// Whether a blob with this key exists in the filesystem backend.
    pub fn blob_exists(&self, key: &str) -> bool {
        self.blob_dir.join(key).exists()
    }
}
