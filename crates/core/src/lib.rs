//! Core domain types and shared logic for the depot gateway.
//!
//! This crate defines the canonical vocabulary used across all other crates:
//! - Resource and file status state machines
//! - The size-qualified content fingerprint and its sampling rule
//! - Strongly-typed application configuration

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod status;

pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintBuilder, SamplePlan, EDGE_LEN};
pub use status::{FileStatus, OperationStatus, OperationType, ResourceStatus};

/// Listing page size used when walking a resource's content upstream.
pub const LIST_PAGE_SIZE: u64 = 100;

/// Seconds a row must sit untouched before the dispatcher considers it due.
/// Also the window during which a file row counts as actively being stored
/// by another worker.
pub const CLAIM_SKEW_SECS: u64 = 10;
