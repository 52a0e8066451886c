//! Resource queueing and inspection handlers.
//!
//! These are thin wrappers over the metadata store: PUT queues a store,
//! DELETE queues a deletion (or cancels a store that never started), GET
//! returns the row. The actual work happens in the dispatcher/worker
//! pipeline.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use depot_metadata::models::ResourceRow;
use depot_metadata::ResourceRepo;
use serde::Serialize;
use serde_json::{json, Value};

/// Resource row as rendered in API responses.
#[derive(Debug, Serialize)]
pub struct ResourceView {
    pub resource_id: String,
    pub status: String,
    pub total_size: i64,
    pub stored_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
}

impl From<ResourceRow> for ResourceView {
    fn from(row: ResourceRow) -> Self {
        Self {
            resource_id: row.resource_id,
            status: row.status,
            total_size: row.total_size,
            stored_size: row.stored_size,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn resource_body(row: ResourceRow) -> Value {
    json!({ "resource": ResourceView::from(row) })
}

/// PUT /resource/{id} - queue a resource for storing.
pub async fn put_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let row = state.metadata.queue_for_storing(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(resource_body(row))))
}

/// GET /resource/{id} - fetch a resource row.
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let row = state
        .metadata
        .get_resource(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("resource not found: {id}")))?;
    Ok(Json(resource_body(row)))
}

/// DELETE /resource/{id} - queue a resource for deletion, or cancel a store
/// that never started. Absent rows (including the cancel case) answer 404.
pub async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let row = state
        .metadata
        .queue_for_deletion(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("resource not found: {id}")))?;
    Ok((StatusCode::ACCEPTED, Json(resource_body(row))))
}
