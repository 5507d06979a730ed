//! # Error Handling
//!
//! Error types for the guild backup engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (call-fatal, returned from capture / restore / delete)           │
//! │  │                                                                      │
//! │  ├── DuplicateName       - Snapshot name already used in this guild     │
//! │  ├── NotFound            - No snapshot matches the id or name           │
//! │  ├── ForeignOwnership    - Snapshot belongs to another guild            │
//! │  ├── AlreadyInProgress   - A restore is already running on the target   │
//! │  ├── Throttled           - Platform asked us to back off                │
//! │  ├── Platform            - Hard platform failure                        │
//! │  ├── Storage / Io        - Snapshot file could not be read or written   │
//! │  └── Serialization       - Snapshot record could not be (de)serialized  │
//! │                                                                         │
//! │  Per-entity failures never become an Error. They are collected in an    │
//! │  ErrorAccumulator and surfaced through the report.                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::platform::PlatformError;

/// Result type alias for backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the backup engine
#[derive(Error, Debug)]
pub enum Error {
    /// Capture was asked to reuse a name already taken in the same guild
    #[error("A snapshot named \"{name}\" already exists for guild {guild_id}.")]
    DuplicateName { guild_id: String, name: String },

    /// No snapshot could be resolved by id or by name
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// The resolved snapshot was captured from a different guild
    #[error("Snapshot {snapshot_id} belongs to guild {owner_guild_id}, not {guild_id}.")]
    ForeignOwnership {
        snapshot_id: String,
        owner_guild_id: String,
        guild_id: String,
    },

    /// Another restore already holds the target guild
    #[error("A restore is already in progress for guild {0}.")]
    AlreadyInProgress(String),

    /// The platform rate limiter rejected the call
    #[error("Rate limited, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    /// The platform rejected the call outright
    #[error("Platform error: {0}")]
    Platform(String),

    /// Snapshot persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Throttled { retry_after } => Error::Throttled { retry_after },
            PlatformError::Failed(msg) => Error::Platform(msg),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_conversion() {
        let throttled: Error = PlatformError::Throttled {
            retry_after: Duration::from_millis(1500),
        }
        .into();
        assert!(matches!(
            throttled,
            Error::Throttled { retry_after } if retry_after == Duration::from_millis(1500)
        ));

        let failed: Error = PlatformError::Failed("403: Missing Access".to_string()).into();
        assert_eq!(failed.to_string(), "Platform error: 403: Missing Access");
    }

    #[test]
    fn test_foreign_ownership_message() {
        let err = Error::ForeignOwnership {
            snapshot_id: "1700000000000".to_string(),
            owner_guild_id: "222".to_string(),
            guild_id: "111".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Snapshot 1700000000000 belongs to guild 222, not 111."
        );
    }
}
