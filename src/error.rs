// SPDX-License-Identifier: MPL-2.0

use crate::cache::CacheError;
use crate::identity::IdentityError;
use crate::remote::ClientError;
use thiserror::Error;

/// Failure of a sync operation, as seen by callers of the engine.
///
/// Local store failures (`BulkOperationFailed`, `CreateFailed`, ...) arrive
/// wrapped in [`SyncError::Cache`] so callers can tell a rejected batch from
/// a rejected single row.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentityError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("remote request failed: {0}")]
    RemoteRequestFailed(#[from] ClientError),
    #[error("invalid cursor for stream {stream}: {cursor}")]
    InvalidCursor { stream: String, cursor: i64 },
    #[error("cursor {after} is not a known member of stream {stream}")]
    UnknownCursor { stream: String, after: String },
    #[error("invalid route pattern: {0}")]
    InvalidRoutePattern(#[from] regex::Error),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

impl SyncError {
    /// True when the failure happened before any remote side effect.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncError::Cache(_)
                | SyncError::InvalidIdentifier(_)
                | SyncError::InvalidCursor { .. }
                | SyncError::UnknownCursor { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Table;

    #[test]
    fn test_bulk_and_create_failures_are_distinct() {
        let bulk = SyncError::from(CacheError::BulkOperationFailed {
            table: Table::PostDetails,
            source: Box::new(CacheError::NotFound),
        });
        let create = SyncError::from(CacheError::CreateFailed {
            table: Table::UserRelationships,
            id: "a:b".into(),
            source: Box::new(CacheError::NotFound),
        });

        assert!(matches!(
            bulk,
            SyncError::Cache(CacheError::BulkOperationFailed { .. })
        ));
        assert!(matches!(
            create,
            SyncError::Cache(CacheError::CreateFailed { .. })
        ));
        assert!(bulk.is_local() && create.is_local());
        assert!(bulk.to_string().contains("post_details"));
    }

    #[test]
    fn test_remote_failure_is_not_local() {
        let err = SyncError::from(ClientError::Network("timeout".into()));
        assert!(!err.is_local());
        assert!(err.to_string().contains("remote request failed"));
    }
}
