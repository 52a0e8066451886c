//! Web-seed proxy: streams stored files out of the blob store with HTTP
//! range support.
//!
//! 404 covers every "not servable" case: resource absent, resource not yet
//! Stored, unknown path, blob missing. The `Range` request header is
//! forwarded to the blob store verbatim and the backend's response headers
//! are relayed.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::RANGE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use depot_core::ResourceStatus;
use depot_metadata::{LinkRepo, ResourceRepo};
use depot_storage::{BlobMeta, BlobStore, StorageError};
use time::macros::format_description;

/// GET/HEAD /webseed/{id}/{path} - stream a stored file.
pub async fn webseed(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve(state, id, &path, method, headers).await
}

/// GET/HEAD /webseed/{id} - a bare resource id answers 200 when the
/// resource is fully stored.
pub async fn webseed_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve(state, id, "", method, headers).await
}

async fn serve(
    state: AppState,
    id: String,
    path: &str,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let not_found = || ApiError::NotFound(format!("webseed: {id}"));

    let resource = state.metadata.get_resource(&id).await?.ok_or_else(not_found)?;
    if resource.status != ResourceStatus::Stored.as_str() {
        return Err(not_found());
    }

    if path.is_empty() || path == "/" {
        return empty_response(StatusCode::OK);
    }

    let path = crate::normalize_path(path);
    let hash = state
        .metadata
        .find_file_hash(&id, &path)
        .await?
        .ok_or_else(not_found)?;

    let range = headers.get(RANGE).and_then(|value| value.to_str().ok());

    if method == Method::HEAD {
        let meta = match state.blobs.head(&hash, range).await {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };
        let status = partial_status(&meta);
        let builder = apply_meta(Response::builder().status(status), &meta, false);
        return builder
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let object = match state.blobs.get(&hash, range).await {
        Ok(object) => object,
        Err(StorageError::NotFound(_)) => return Err(not_found()),
        Err(err) => return Err(err.into()),
    };

    let status = partial_status(&object.meta);
    let builder = apply_meta(Response::builder().status(status), &object.meta, true);
    builder
        .body(Body::from_stream(object.stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn partial_status(meta: &BlobMeta) -> StatusCode {
    if meta.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    }
}

fn empty_response(status: StatusCode) -> ApiResult<Response> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Relay blob-store headers onto the response.
fn apply_meta(
    mut builder: axum::http::response::Builder,
    meta: &BlobMeta,
    default_content_type: bool,
) -> axum::http::response::Builder {
    builder = builder.header(
        "Accept-Ranges",
        meta.accept_ranges.as_deref().unwrap_or("bytes"),
    );

    match (&meta.content_type, default_content_type) {
        (Some(content_type), _) => builder = builder.header("Content-Type", content_type),
        (None, true) => builder = builder.header("Content-Type", "application/octet-stream"),
        (None, false) => {}
    }
    if let Some(length) = meta.content_length {
        builder = builder.header("Content-Length", length.to_string());
    }
    if let Some(content_range) = &meta.content_range {
        builder = builder.header("Content-Range", content_range);
    }
    if let Some(etag) = &meta.etag {
        builder = builder.header("ETag", etag);
    }
    if let Some(last_modified) = meta.last_modified {
        if let Some(value) = http_date(last_modified) {
            builder = builder.header("Last-Modified", value);
        }
    }
    builder
}

/// Format a timestamp as an HTTP-date (IMF-fixdate, always GMT).
fn http_date(timestamp: time::OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn http_date_is_imf_fixdate() {
        let value = http_date(datetime!(1994-11-06 08:49:37 UTC)).unwrap();
        assert_eq!(value, "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
