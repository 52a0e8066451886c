//! HTTP surface, dispatcher, and worker pool of the depot gateway.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod worker;

pub use dispatch::{Dispatcher, JOB_QUEUE_CAPACITY};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use worker::{Job, Worker};

/// Paths inside a resource are stored and looked up with a leading slash,
/// matching the upstream listing's path form.
pub(crate) fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
