//! Client for the upstream content-listing API.

use crate::error::{UpstreamError, UpstreamResult};
use crate::types::{ByteRange, ErrorResponse, ExportResponse, ListResponse};
use bytes::Bytes;
use depot_core::config::UpstreamConfig;
use futures::{Stream, TryStreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

/// A boxed stream of downloaded bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = UpstreamResult<Bytes>> + Send>>;

/// Role claim carried by every signed request.
const TOKEN_ROLE: &str = "depot";

/// Claims of the short-lived HS256 token sent as `X-Token`.
#[derive(Debug, Serialize)]
struct Claims {
    role: &'static str,
    #[serde(rename = "sessionID")]
    session_id: String,
    agent: String,
    #[serde(rename = "remoteAddress")]
    remote_address: String,
    exp: u64,
}

/// Read-only client over the upstream content-listing API.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    encoding_key: EncodingKey,
    expire_secs: u64,
    proxy: Option<(String, u16)>,
}

impl UpstreamClient {
    /// Create a client from configuration, reusing the given HTTP client.
    pub fn new(config: &UpstreamConfig, http: reqwest::Client) -> Self {
        let proxy = config
            .use_internal_proxy
            .then(|| (config.proxy_host.clone(), config.proxy_port));
        tracing::info!(endpoint = %config.base_url(), "upstream api endpoint");
        Self {
            http,
            base_url: config.base_url(),
            api_key: config.api_key.clone(),
            encoding_key: EncodingKey::from_secret(config.api_secret.as_bytes()),
            expire_secs: u64::from(config.expire_days) * 24 * 60 * 60,
            proxy,
        }
    }

    fn sign_token(&self) -> UpstreamResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            role: TOKEN_ROLE,
            session_id: String::new(),
            agent: String::new(),
            remote_address: String::new(),
            exp: now + self.expire_secs,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    async fn get_json<T>(&self, url: &str, query: &[(&str, String)]) -> UpstreamResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let token = self.sign_token()?;
        let response = self
            .http
            .get(url)
            .query(query)
            .header("X-Token", token)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body).map_err(|source| UpstreamError::Parse {
                    status: status.as_u16(),
                    url: url.to_string(),
                    source,
                })
            }
            // Unknown resources answer 404; treat as empty.
            StatusCode::NOT_FOUND => Ok(T::default()),
            StatusCode::FORBIDDEN => Err(UpstreamError::Forbidden(url.to_string())),
            _ => {
                let body = response.bytes().await?;
                match serde_json::from_slice::<ErrorResponse>(&body) {
                    Ok(envelope) => Err(UpstreamError::Api(envelope.error)),
                    Err(source) => Err(UpstreamError::Parse {
                        status: status.as_u16(),
                        url: url.to_string(),
                        source,
                    }),
                }
            }
        }
    }

    /// Paginated listing of a resource's content.
    pub async fn list_resource_content(
        &self,
        resource_id: &str,
        limit: u64,
        offset: u64,
    ) -> UpstreamResult<ListResponse> {
        let url = format!("{}/resource/{}/list", self.base_url, resource_id);
        self.get_json(
            &url,
            &[
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
                ("path", "/".to_string()),
                ("output", "list".to_string()),
            ],
        )
        .await
    }

    /// Fetch the named export URLs of a listed item.
    pub async fn export_resource_content(
        &self,
        resource_id: &str,
        item_id: &str,
    ) -> UpstreamResult<ExportResponse> {
        let url = format!(
            "{}/resource/{}/export/{}",
            self.base_url, resource_id, item_id
        );
        self.get_json(&url, &[]).await
    }

    /// Open a byte stream over a signed download URL.
    ///
    /// Download URLs carry their own authorization, so no token headers are
    /// attached. The optional range is a standard HTTP byte range.
    pub async fn download(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> UpstreamResult<ByteStream> {
        let url = self.rewrite_for_proxy(url)?;
        let mut request = self.http.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.to_header());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(Box::pin(response.bytes_stream().map_err(UpstreamError::Http)))
    }

    /// Swap the host of a download URL for the internal fetch proxy when
    /// configured.
    fn rewrite_for_proxy(&self, url: &str) -> UpstreamResult<String> {
        let Some((host, port)) = &self.proxy else {
            return Ok(url.to_string());
        };
        let mut parsed = reqwest::Url::parse(url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{url}: {e}")))?;
        parsed
            .set_scheme("http")
            .map_err(|_| UpstreamError::InvalidUrl(url.to_string()))?;
        parsed
            .set_host(Some(host))
            .map_err(|e| UpstreamError::InvalidUrl(format!("{url}: {e}")))?;
        parsed
            .set_port(Some(*port))
            .map_err(|_| UpstreamError::InvalidUrl(url.to_string()))?;
        Ok(parsed.to_string())
    }
}
