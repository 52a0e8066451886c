//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration.
///
/// Constructed once at startup and passed to each component's constructor;
/// there is no process-wide mutable configuration state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Blob store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upstream content-listing API configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Validate configuration invariants across all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.storage.validate()?;
        self.upstream.validate()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host. Empty means all interfaces.
    #[serde(default)]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// Bind address in `host:port` form, defaulting the host to all
    /// interfaces when empty.
    pub fn bind_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{}:{}", host, self.port)
    }
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Database host.
        host: String,
        /// Database port.
        #[serde(default = "default_pg_port")]
        port: u16,
        /// Database username.
        username: Option<String>,
        /// Database password.
        password: Option<String>,
        /// Database name.
        database: String,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres { host, database, .. } => {
                if host.is_empty() {
                    return Err("postgres config requires 'host'".to_string());
                }
                if database.is_empty() {
                    return Err("postgres config requires 'database'".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Blob store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain
        /// when unset.
        access_key_id: Option<String>,
        /// AWS secret access key.
        secret_access_key: Option<String>,
        /// Use path-style URLs (`endpoint/bucket/key`). Required for MinIO
        /// and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires 'bucket'".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Upstream content-listing API configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream API host.
    #[serde(default)]
    pub host: String,
    /// Upstream API port.
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    /// Use https when talking to the upstream API.
    #[serde(default)]
    pub secure: bool,
    /// API key sent as `X-Api-Key`.
    #[serde(default)]
    pub api_key: String,
    /// HS256 secret used to sign the `X-Token` claims.
    #[serde(default)]
    pub api_secret: String,
    /// Token validity window in days.
    #[serde(default = "default_expire_days")]
    pub expire_days: u32,
    /// Rewrite export download URLs to the internal fetch proxy.
    #[serde(default)]
    pub use_internal_proxy: bool,
    /// Internal fetch proxy host.
    #[serde(default)]
    pub proxy_host: String,
    /// Internal fetch proxy port.
    #[serde(default = "default_upstream_port")]
    pub proxy_port: u16,
}

fn default_upstream_port() -> u16 {
    80
}

fn default_expire_days() -> u32 {
    1
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_upstream_port(),
            secure: false,
            api_key: String::new(),
            api_secret: String::new(),
            expire_days: default_expire_days(),
            use_internal_proxy: false,
            proxy_host: String::new(),
            proxy_port: default_upstream_port(),
        }
    }
}

impl UpstreamConfig {
    /// Base URL of the upstream API.
    pub fn base_url(&self) -> String {
        let protocol = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.host, self.port)
    }

    /// Validate upstream configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.use_internal_proxy && self.proxy_host.is_empty() {
            return Err("upstream config requires 'proxy_host' when use_internal_proxy is set"
                .to_string());
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers draining the job queue.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

fn default_worker_count() -> usize {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_defaults_empty_host() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn s3_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn upstream_base_url() {
        let config = UpstreamConfig {
            host: "api.internal".to_string(),
            port: 8090,
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://api.internal:8090");

        let secure = UpstreamConfig {
            host: "api.example.com".to_string(),
            port: 443,
            secure: true,
            ..Default::default()
        };
        assert_eq!(secure.base_url(), "https://api.example.com:443");
    }

    #[test]
    fn proxy_requires_host() {
        let config = UpstreamConfig {
            use_internal_proxy: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
