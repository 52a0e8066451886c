//! Status vocabulary for resources, files, and operations.
//!
//! Statuses are persisted as snake_case strings; the enums here carry the
//! legal values and the `as_str`/`parse` round-trips the repos rely on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a resource.
///
/// ```text
/// (absent) -> QueuedForStoring -> Storing -> Stored -> QueuedForDeletion
///                                    |                      |
///                                    v                      v
///                               StoreError            Deleting -> (removed)
///                                                           |
///                                                           v
///                                                      DeleteError
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    QueuedForStoring,
    Storing,
    Stored,
    StoreError,
    QueuedForDeletion,
    Deleting,
    DeleteError,
}

impl ResourceStatus {
    /// Stable string form used in the database and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueuedForStoring => "queued_for_storing",
            Self::Storing => "storing",
            Self::Stored => "stored",
            Self::StoreError => "store_error",
            Self::QueuedForDeletion => "queued_for_deletion",
            Self::Deleting => "deleting",
            Self::DeleteError => "delete_error",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "queued_for_storing" => Ok(Self::QueuedForStoring),
            "storing" => Ok(Self::Storing),
            "stored" => Ok(Self::Stored),
            "store_error" => Ok(Self::StoreError),
            "queued_for_deletion" => Ok(Self::QueuedForDeletion),
            "deleting" => Ok(Self::Deleting),
            "delete_error" => Ok(Self::DeleteError),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }

    /// The in-flight status a due resource is claimed into, if any.
    ///
    /// Queued states claim into their in-flight counterpart. An in-flight
    /// state claims into itself: such a row only ever looks due when the
    /// process that owned it died (live jobs bump `updated_at` every flush),
    /// and the claim hands the orphan to a new worker. Terminal error states
    /// wait for the caller to re-arm them.
    pub fn claim_target(&self) -> Option<ResourceStatus> {
        match self {
            Self::QueuedForStoring | Self::Storing => Some(Self::Storing),
            Self::QueuedForDeletion | Self::Deleting => Some(Self::Deleting),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a content-addressed file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Storing,
    Stored,
    StoreError,
    Deleting,
    DeleteError,
}

impl FileStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storing => "storing",
            Self::Stored => "stored",
            Self::StoreError => "store_error",
            Self::Deleting => "deleting",
            Self::DeleteError => "delete_error",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "storing" => Ok(Self::Storing),
            "stored" => Ok(Self::Stored),
            "store_error" => Ok(Self::StoreError),
            "deleting" => Ok(Self::Deleting),
            "delete_error" => Ok(Self::DeleteError),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of background operation recorded in the operation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Store,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Delete => "delete",
        }
    }

    /// The operation performed while a resource sits in the given in-flight
    /// status.
    pub fn for_status(status: ResourceStatus) -> Self {
        match status {
            ResourceStatus::Deleting | ResourceStatus::QueuedForDeletion => Self::Delete,
            _ => Self::Store,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Fail,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
