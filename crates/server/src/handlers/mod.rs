//! HTTP handlers.

pub mod resources;
pub mod webseed;

pub use resources::{delete_resource, get_resource, put_resource, ResourceView};
pub use webseed::{webseed, webseed_root};
