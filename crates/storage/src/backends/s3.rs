//! S3-compatible storage backend using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobMeta, BlobObject, BlobStore, ByteStream};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB). S3 requires all
/// parts except the last to be at least this large.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible blob store.
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects `endpoint/bucket/key` URLs, required for
    /// MinIO and some S3-compatible services; AWS itself wants
    /// virtual-hosted style.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "depot-config");
            builder = builder.credentials_provider(credentials);
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(resolved_region))
                .load()
                .await;
            if let Some(provider) = shared.credentials_provider() {
                builder = builder.credentials_provider(provider);
            }
        }

        if let Some(endpoint) = endpoint {
            // Bare host:port endpoints (e.g. "minio:9000") get an http scheme.
            let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint
            } else {
                format!("http://{endpoint}")
            };

            // Plain-HTTP endpoints (local MinIO) must not pull in native
            // trust roots during client construction.
            if endpoint.starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
            builder = builder.endpoint_url(endpoint);
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
        })
    }

    /// Convert an SDK error, mapping 404 responses to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
            if service_err.raw().status().as_u16() == 404 {
                return StorageError::NotFound(key.to_string());
            }
        }
        StorageError::S3(Box::new(err))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<aws_sdk_s3::types::CompletedPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(aws_sdk_s3::types::CompletedPart::builder()
            .e_tag(output.e_tag().unwrap_or_default())
            .part_number(part_number)
            .build())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(err) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %key,
                upload_id = %upload_id,
                error = %err,
                "failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self, stream), fields(backend = "s3"))]
    async fn put(&self, key: &str, mut stream: ByteStream) -> StorageResult<u64> {
        // Multipart upload lets us stream without knowing the length in
        // advance; parts are buffered up to the S3 minimum. Objects smaller
        // than one part fall back to a single PutObject.
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let mut buffer: Vec<u8> = Vec::with_capacity(MIN_PART_SIZE);
        let mut parts: Vec<aws_sdk_s3::types::CompletedPart> = Vec::new();
        let mut part_number: i32 = 1;
        let mut written: u64 = 0;

        let result: StorageResult<()> = async {
            loop {
                let chunk = match stream.try_next().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => return Err(err),
                };
                written += chunk.len() as u64;
                buffer.extend_from_slice(&chunk);

                while buffer.len() >= MIN_PART_SIZE {
                    let part_data: Vec<u8> = buffer.drain(..MIN_PART_SIZE).collect();
                    let part = self
                        .upload_part(key, &upload_id, part_number, Bytes::from(part_data))
                        .await?;
                    parts.push(part);
                    part_number += 1;
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.abort_upload(key, &upload_id).await;
            return Err(err);
        }

        if parts.is_empty() {
            // Everything fit below the part threshold: abort the multipart
            // upload and write the object in one put.
            self.abort_upload(key, &upload_id).await;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(Bytes::from(buffer).into())
                .send()
                .await
                .map_err(|e| Self::map_sdk_error(e, key))?;
            return Ok(written);
        }

        if !buffer.is_empty() {
            let part = self
                .upload_part(key, &upload_id, part_number, Bytes::from(buffer))
                .await?;
            parts.push(part);
        }

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str, range: Option<&str>) -> StorageResult<BlobObject> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(String::from))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let meta = BlobMeta {
            content_type: output.content_type().map(|s| s.to_string()),
            content_length: output.content_length(),
            content_range: output.content_range().map(|s| s.to_string()),
            etag: output.e_tag().map(|s| s.to_string()),
            last_modified: output
                .last_modified()
                .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok()),
            accept_ranges: output.accept_ranges().map(|s| s.to_string()),
            partial: output.content_range().is_some(),
        };

        let reader = ReaderStream::new(output.body.into_async_read());
        let stream = reader.map_err(StorageError::Io);

        Ok(BlobObject {
            meta,
            stream: Box::pin(stream),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str, range: Option<&str>) -> StorageResult<BlobMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(String::from))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(BlobMeta {
            content_type: output.content_type().map(|s| s.to_string()),
            content_length: output.content_length(),
            content_range: output.content_range().map(|s| s.to_string()),
            etag: output.e_tag().map(|s| s.to_string()),
            last_modified: output
                .last_modified()
                .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok()),
            accept_ranges: output.accept_ranges().map(|s| s.to_string()),
            partial: output.content_range().is_some(),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // Delete is idempotent: S3 treats missing keys as success, and any
        // 404 that does surface is swallowed here.
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match Self::map_sdk_error(err, key) {
                StorageError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &self.bucket))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_rejects_partial_credentials() {
        let err = S3Backend::new(
            "bucket",
            None,
            Some("us-east-1".to_string()),
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn new_accepts_bare_endpoint() {
        let backend = S3Backend::new(
            "bucket",
            Some("minio:9000".to_string()),
            Some("us-east-1".to_string()),
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .unwrap();
        assert_eq!(backend.backend_name(), "s3");
    }
}
