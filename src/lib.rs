//! # Flight Archive
//!
//! Ingest and archival layer for airborne campaign measurements. Raw
//! records from instruments are validated against a flag registry,
//! converted to canonical units, bundled per acquisition start time and
//! persisted as one group per instance in a campaign archive.
//!
//! ## Crate Structure
//!
//! - **`registry`**: The set of valid tags with canonical units and
//!   descriptions, including generic indexed tags such as `Counts_#`.
//! - **`units`**: Unit parsing and conversion between commensurable units.
//! - **`raw`**: The untyped input record and the per-ingest unit spec.
//! - **`column`**: A validated, unit-annotated time-series column.
//! - **`structure`**: The timing skeleton every instance carries
//!   (`date_time` and the `Time` index).
//! - **`frame`**: Time-indexed tables with outer joins, resampling and
//!   windowing.
//! - **`dict`**: `ColumnDict`, one measurement instance.
//! - **`collection`**: `GroupCollection`, instances keyed by formatted
//!   start time.
//! - **`archive`**: `CampaignArchive`, the on-disk store (HDF5 or Parquet).
//! - **`config`**: Figment-based configuration (TOML plus environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide `ArchiveError`.

pub mod archive;
pub mod collection;
pub mod column;
pub mod config;
pub mod dict;
pub mod error;
pub mod frame;
pub mod logging;
pub mod raw;
pub mod registry;
pub mod structure;
pub mod units;

pub use archive::{ArchiveSettings, BackendKind, CampaignArchive, OpenMode, Validity};
pub use collection::{GroupCollection, GroupNameFormat};
pub use column::TypedColumn;
pub use dict::{ColumnDict, TagMetadata};
pub use error::{ArchiveError, ArchiveResult};
pub use frame::TimeFrame;
pub use raw::{ExtraValue, RawRecord, RawValue, UnitSpec};
pub use registry::{FlagDefinition, FlagRegistry};
pub use units::UnitSystem;
