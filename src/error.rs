//! Custom error types for the archive.
//!
//! This module defines the primary error type, `ArchiveError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of failure that can occur while ingesting, synchronising and persisting
//! flight data.
//!
//! ## Error Hierarchy
//!
//! - **Schema violations** (`Lookup`): a tag is not in the flag registry, or matches
//!   more than one entry. Always fatal to the current ingest.
//! - **Shape violations** (`Shape`, `Type`): a column has the wrong length or width,
//!   or a raw value has the wrong kind. One corrective transpose is attempted before
//!   `Shape` is raised; nothing else is guessed.
//! - **Unit violations** (`Unit`): propagated from the units engine when a conversion
//!   is dimensionally incompatible or a unit expression cannot be parsed.
//! - **Archive conflicts** (`GroupExists`, `ArchiveExists`, `ArchiveNotFound`,
//!   `InvalidArchive`): recoverable by caller decision. A caller can tell "already
//!   there" apart from "missing" and "corrupt" and choose to append, abort or recreate.
//! - **Backend errors** (`Io`, `Json`, `Hdf5`, `Parquet`, `Arrow`): wrapped with
//!   `#[from]` so the `?` operator works across the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the archive error type.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ArchiveError {
    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Unit error: {0}")]
    Unit(String),

    #[error("Value error: {0}")]
    Value(String),

    #[error("Group name '{0}' does not match the group timestamp format")]
    InvalidGroupName(String),

    #[error("Group '{0}' already exists in archive")]
    GroupExists(String),

    #[error("Archive already exists at {}", .0.display())]
    ArchiveExists(PathBuf),

    #[error("Archive does not exist at {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("Archive at {} is invalid: {reason}", .path.display())]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("Archive opened read-only, cannot write")]
    ReadOnly,

    #[error("Archive has been closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[cfg(feature = "storage_parquet")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "storage_parquet")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for ArchiveError {
    fn from(value: figment::Error) -> Self {
        ArchiveError::Config(Box::new(value))
    }
}

impl ArchiveError {
    /// Structural failures are local and must be fixed by the caller, never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ArchiveError::Lookup(_)
                | ArchiveError::Type(_)
                | ArchiveError::Shape(_)
                | ArchiveError::Unit(_)
                | ArchiveError::Value(_)
                | ArchiveError::InvalidGroupName(_)
        )
    }

    /// Conflicts a caller may resolve by appending, aborting or recreating.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ArchiveError::GroupExists(_)
                | ArchiveError::ArchiveExists(_)
                | ArchiveError::ArchiveNotFound(_)
                | ArchiveError::InvalidArchive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_structural_errors() {
        assert!(ArchiveError::Lookup("Foo".into()).is_structural());
        assert!(ArchiveError::Shape("len".into()).is_structural());
        assert!(!ArchiveError::GroupExists("20220101_000000".into()).is_structural());
    }

    #[test]
    fn classifies_conflicts() {
        assert!(ArchiveError::GroupExists("20220101_000000".into()).is_conflict());
        assert!(ArchiveError::ArchiveNotFound(PathBuf::from("x.h5")).is_conflict());
        assert!(!ArchiveError::ReadOnly.is_conflict());
    }

    #[test]
    fn invalid_archive_message_names_path() {
        let err = ArchiveError::InvalidArchive {
            path: PathBuf::from("/data/campaign.h5"),
            reason: "group 'junk' is not a timestamp".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/campaign.h5"));
        assert!(msg.contains("junk"));
    }
}
