//! Campaign Archive: a file-backed store with one group per measurement
//! instance.
//!
//! Each group holds a `columns` area (one resampled table plus per-column
//! units and descriptions) and an `extras` area (non time-series values plus
//! their own units and descriptions). Writes never overwrite an existing group
//! unless the archive was opened with overwrite confirmed.
//!
//! # State machine
//!
//! ```text
//! open(path, mode) ──► Open(read) ────────┐
//!                 └──► Open(write/append) ─┴─► close() ──► Closed
//! ```
//!
//! A read-only open of a missing or malformed store does not fail; it is
//! reported through [`CampaignArchive::validity`] and reads then fail with
//! [`ArchiveError::ArchiveNotFound`] or [`ArchiveError::InvalidArchive`].

mod record;

#[cfg(feature = "storage_hdf5")]
mod hdf5;
#[cfg(feature = "storage_parquet")]
mod parquet;

pub use record::GroupRecord;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::{GroupCollection, GroupNameFormat};
use crate::dict::ColumnDict;
use crate::error::{ArchiveError, ArchiveResult};
use crate::registry::FlagRegistry;

/// Default nominal timestamp format written to each group's `date_time` attribute.
pub const DEFAULT_NOMINAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage backend, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single hierarchical HDF5 file.
    Hdf5,
    /// Directory bundle of Parquet tables and JSON metadata.
    Parquet,
}

impl BackendKind {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hdf5 => "hdf5",
            BackendKind::Parquet => "parquet",
        }
    }

    /// Cargo feature providing the backend.
    pub fn feature(&self) -> &'static str {
        match self {
            BackendKind::Hdf5 => "storage_hdf5",
            BackendKind::Parquet => "storage_parquet",
        }
    }

    /// Whether the backend was compiled in.
    pub fn is_enabled(&self) -> bool {
        match self {
            BackendKind::Hdf5 => cfg!(feature = "storage_hdf5"),
            BackendKind::Parquet => cfg!(feature = "storage_parquet"),
        }
    }

    /// Backends compiled into this build.
    pub fn available() -> Vec<BackendKind> {
        [BackendKind::Hdf5, BackendKind::Parquet]
            .into_iter()
            .filter(BackendKind::is_enabled)
            .collect()
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "storage_parquet") {
            BackendKind::Parquet
        } else {
            BackendKind::Hdf5
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hdf5" | "h5" => Ok(BackendKind::Hdf5),
            "parquet" => Ok(BackendKind::Parquet),
            other => Err(ArchiveError::Configuration(format!(
                "Unsupported storage backend: '{other}'. Must be one of: hdf5, parquet"
            ))),
        }
    }
}

/// File open modes, mirroring the hierarchical-file conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`: read only, must exist.
    Read,
    /// `r+`: read/write, must exist.
    ReadWrite,
    /// `a`: read/write, created if absent.
    Append,
    /// `w`: create, truncating an existing store (needs overwrite confirmed).
    Create,
    /// `w-` or `x`: create, failing if the store exists.
    CreateNew,
}

impl OpenMode {
    /// Whether writes are permitted.
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Mode string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadWrite => "r+",
            OpenMode::Append => "a",
            OpenMode::Create => "w",
            OpenMode::CreateNew => "w-",
        }
    }
}

impl FromStr for OpenMode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadWrite),
            "a" => Ok(OpenMode::Append),
            "w" => Ok(OpenMode::Create),
            "w-" | "x" => Ok(OpenMode::CreateNew),
            other => Err(ArchiveError::Value(format!("unknown open mode '{other}'"))),
        }
    }
}

/// Whether an opened store is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Every top-level name is a well formed group name.
    Valid,
    /// Nothing exists at the path.
    Missing,
    /// The path exists but is not a usable archive.
    Malformed {
        /// Why the store was rejected.
        reason: String,
    },
}

impl Validity {
    /// True for [`Validity::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Valid => f.write_str("valid"),
            Validity::Missing => f.write_str("missing"),
            Validity::Malformed { reason } => write!(f, "malformed ({reason})"),
        }
    }
}

/// Settings shared by every archive opened by a process.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Group name pattern.
    pub group_format: GroupNameFormat,
    /// Pattern of the human readable `date_time` group attribute.
    pub nominal_format: String,
    /// Write-time resample period; `None` writes rows unresampled.
    pub timestep: Option<Duration>,
    /// Storage backend.
    pub backend: BackendKind,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            group_format: GroupNameFormat::default(),
            nominal_format: DEFAULT_NOMINAL_FORMAT.to_string(),
            timestep: Some(Duration::seconds(1)),
            backend: BackendKind::default(),
        }
    }
}

/// How a backend should open its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
    Create,
}

/// Physical storage of groups.
pub(crate) trait ArchiveBackend: fmt::Debug {
    /// Top-level names in the store.
    fn group_names(&self) -> ArchiveResult<Vec<String>>;

    /// Writes one new group.
    fn write_group(&mut self, name: &str, record: &GroupRecord) -> ArchiveResult<()>;

    /// Reads one group.
    fn read_group(&self, name: &str) -> ArchiveResult<GroupRecord>;

    /// Deletes a group.
    fn remove_group(&mut self, name: &str) -> ArchiveResult<()>;

    /// Flushes and releases the store.
    fn close(&mut self) -> ArchiveResult<()>;

    fn has_group(&self, name: &str) -> ArchiveResult<bool> {
        Ok(self.group_names()?.iter().any(|n| n == name))
    }
}

fn open_backend(
    kind: BackendKind,
    path: &Path,
    access: Access,
) -> ArchiveResult<Box<dyn ArchiveBackend>> {
    match kind {
        #[cfg(feature = "storage_hdf5")]
        BackendKind::Hdf5 => Ok(Box::new(hdf5::Hdf5Backend::open(path, access)?)),
        #[cfg(feature = "storage_parquet")]
        BackendKind::Parquet => Ok(Box::new(parquet::ParquetBackend::open(path, access)?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = (path, access);
            Err(ArchiveError::FeatureNotEnabled(other.feature().to_string()))
        }
    }
}

/// An opened campaign archive.
#[derive(Debug)]
pub struct CampaignArchive {
    path: PathBuf,
    mode: OpenMode,
    settings: ArchiveSettings,
    registry: Arc<FlagRegistry>,
    validity: Validity,
    overwrite: bool,
    backend: Option<Box<dyn ArchiveBackend>>,
    staged: Option<GroupCollection>,
    closed: bool,
}

impl CampaignArchive {
    /// Opens an archive without overwrite confirmation.
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        settings: ArchiveSettings,
        registry: Arc<FlagRegistry>,
    ) -> ArchiveResult<Self> {
        Self::open_with(path, mode, settings, registry, false)
    }

    /// Opens an archive.
    ///
    /// With `confirm_overwrite`, mode `w` may truncate an existing store and
    /// writes replace groups that already exist.
    pub fn open_with(
        path: impl AsRef<Path>,
        mode: OpenMode,
        settings: ArchiveSettings,
        registry: Arc<FlagRegistry>,
        confirm_overwrite: bool,
    ) -> ArchiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let kind = settings.backend;
        if !kind.is_enabled() {
            return Err(ArchiveError::FeatureNotEnabled(kind.feature().to_string()));
        }

        let mut archive = Self {
            path,
            mode,
            settings,
            registry,
            validity: Validity::Missing,
            overwrite: confirm_overwrite,
            backend: None,
            staged: None,
            closed: false,
        };
        let exists = archive.path.exists();

        match mode {
            OpenMode::Read => {
                if exists {
                    archive.inspect(Access::Read);
                }
                if let Validity::Malformed { reason } = &archive.validity {
                    warn!(path = %archive.path.display(), %reason, "archive is not usable");
                }
            }
            OpenMode::ReadWrite | OpenMode::Append => {
                if !exists && mode == OpenMode::ReadWrite {
                    return Err(ArchiveError::ArchiveNotFound(archive.path.clone()));
                }
                if exists {
                    archive.inspect(Access::Write);
                    archive.require_valid()?;
                } else {
                    archive.backend = Some(open_backend(kind, &archive.path, Access::Create)?);
                    archive.validity = Validity::Valid;
                }
            }
            OpenMode::Create | OpenMode::CreateNew => {
                if exists && (mode == OpenMode::CreateNew || !confirm_overwrite) {
                    return Err(ArchiveError::ArchiveExists(archive.path.clone()));
                }
                if exists {
                    info!(path = %archive.path.display(), "truncating existing archive");
                }
                archive.backend = Some(open_backend(kind, &archive.path, Access::Create)?);
                archive.validity = Validity::Valid;
            }
        }

        debug!(archive = %archive, "opened archive");
        Ok(archive)
    }

    fn inspect(&mut self, access: Access) {
        let backend = match open_backend(self.settings.backend, &self.path, access) {
            Ok(backend) => backend,
            Err(e) => {
                self.validity = Validity::Malformed {
                    reason: e.to_string(),
                };
                return;
            }
        };
        self.validity = match backend.group_names() {
            Ok(names) => {
                let bad: Vec<String> = names
                    .into_iter()
                    .filter(|n| !self.settings.group_format.is_valid(n))
                    .collect();
                if bad.is_empty() {
                    Validity::Valid
                } else {
                    Validity::Malformed {
                        reason: format!("not group names: {}", bad.join(", ")),
                    }
                }
            }
            Err(e) => Validity::Malformed {
                reason: e.to_string(),
            },
        };
        self.backend = Some(backend);
    }

    fn require_valid(&self) -> ArchiveResult<()> {
        match &self.validity {
            Validity::Valid => Ok(()),
            Validity::Missing => Err(ArchiveError::ArchiveNotFound(self.path.clone())),
            Validity::Malformed { reason } => Err(ArchiveError::InvalidArchive {
                path: self.path.clone(),
                reason: reason.clone(),
            }),
        }
    }

    fn backend(&self) -> ArchiveResult<&dyn ArchiveBackend> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        self.require_valid()?;
        self.backend
            .as_deref()
            .ok_or_else(|| ArchiveError::ArchiveNotFound(self.path.clone()))
    }

    fn backend_mut(&mut self) -> ArchiveResult<&mut Box<dyn ArchiveBackend>> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        if !self.mode.is_writable() {
            return Err(ArchiveError::ReadOnly);
        }
        self.require_valid()?;
        let path = self.path.clone();
        self.backend
            .as_mut()
            .ok_or(ArchiveError::ArchiveNotFound(path))
    }

    /// Path of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the archive was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Validity established at open time.
    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    /// True when the store is usable.
    pub fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    /// True after [`CampaignArchive::close`].
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Settings in effect.
    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Group names, sorted.
    pub fn group_names(&self) -> ArchiveResult<Vec<String>> {
        let mut names = self.backend()?.group_names()?;
        names.sort();
        Ok(names)
    }

    /// Accumulates a collection for a later [`CampaignArchive::write_staged`].
    pub fn stage(&mut self, collection: GroupCollection) -> ArchiveResult<()> {
        collection.validate()?;
        self.staged = Some(match self.staged.take() {
            Some(staged) => staged.combine(&collection)?,
            None => collection,
        });
        Ok(())
    }

    /// Collection waiting to be written.
    pub fn staged(&self) -> Option<&GroupCollection> {
        self.staged.as_ref()
    }

    /// Writes the staged collection and clears it.
    pub fn write_staged(&mut self) -> ArchiveResult<usize> {
        let Some(staged) = self.staged.take() else {
            return Ok(0);
        };
        match self.write(&staged) {
            Ok(written) => Ok(written),
            Err(e) => {
                self.staged = Some(staged);
                Err(e)
            }
        }
    }

    /// Writes one new group per instance and returns the number written.
    ///
    /// Every target name is checked before anything is written; an existing
    /// group (or a name repeated within the collection) fails the whole call
    /// with [`ArchiveError::GroupExists`] unless overwrite was confirmed.
    pub fn write(&mut self, collection: &GroupCollection) -> ArchiveResult<usize> {
        collection.validate()?;
        let overwrite = self.overwrite;
        let timestep = self.settings.timestep;
        let nominal = self.settings.nominal_format.clone();
        let backend = self.backend_mut()?;

        let mut seen = std::collections::HashSet::new();
        for name in collection.group_names() {
            if !seen.insert(name.as_str()) || (!overwrite && backend.has_group(name)?) {
                return Err(ArchiveError::GroupExists(name.clone()));
            }
        }

        let mut written = 0;
        for (name, instance) in collection.iter() {
            let record = GroupRecord::from_dict(instance, timestep, &nominal)?;
            if overwrite && backend.has_group(name)? {
                warn!(group = name, "overwriting existing group");
                backend.remove_group(name)?;
            }
            backend.write_group(name, &record)?;
            info!(
                group = name,
                rows = record.frame.len(),
                columns = record.frame.columns().len(),
                extras = record.extras.len(),
                "wrote group"
            );
            written += 1;
        }
        Ok(written)
    }

    /// Raw stored form of one group.
    pub fn read_record(&self, name: &str) -> ArchiveResult<GroupRecord> {
        let backend = self.backend()?;
        if !backend.has_group(name)? {
            return Err(ArchiveError::Lookup(format!(
                "group {name} not found in {}",
                self.path.display()
            )));
        }
        backend.read_group(name)
    }

    /// Reconstructs one group as a column dictionary.
    pub fn read_group(&self, name: &str) -> ArchiveResult<ColumnDict> {
        let fallback = self.settings.group_format.validate(name)?;
        self.read_record(name)?
            .into_dict(fallback, Arc::clone(&self.registry))
    }

    /// Reconstructs the first group by name order.
    pub fn read_first(&self) -> ArchiveResult<Option<ColumnDict>> {
        match self.group_names()?.first() {
            Some(name) => self.read_group(name).map(Some),
            None => Ok(None),
        }
    }

    /// Reconstructs every group.
    pub fn read(&self) -> ArchiveResult<GroupCollection> {
        let named = self
            .group_names()?
            .into_iter()
            .map(|name| {
                let dict = self.read_group(&name)?;
                Ok((name, dict))
            })
            .collect::<ArchiveResult<Vec<_>>>()?;
        GroupCollection::from_named(named, self.settings.group_format.clone())
    }

    /// Releases the store. Safe to call more than once.
    pub fn close(&mut self) -> ArchiveResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut backend) = self.backend.take() {
            backend.close()?;
        }
        debug!(path = %self.path.display(), "closed archive");
        Ok(())
    }
}

impl Drop for CampaignArchive {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close archive");
        }
    }
}

impl fmt::Display for CampaignArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = if self.closed {
            "closed".to_string()
        } else {
            match self.group_names() {
                Ok(names) => format!("{} groups", names.len()),
                Err(_) => "no groups".to_string(),
            }
        };
        write!(
            f,
            "{} archive {} [{}] {}, {}",
            self.settings.backend,
            self.path.display(),
            self.mode.as_str(),
            self.validity,
            groups
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_modes() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("r+".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
        assert_eq!("a".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::Create);
        assert_eq!("x".parse::<OpenMode>().unwrap(), OpenMode::CreateNew);
        assert_eq!("w-".parse::<OpenMode>().unwrap(), OpenMode::CreateNew);
        assert!("rw".parse::<OpenMode>().is_err());
        assert!(!OpenMode::Read.is_writable());
    }

    #[test]
    fn parses_backend_kinds() {
        assert_eq!("HDF5".parse::<BackendKind>().unwrap(), BackendKind::Hdf5);
        assert_eq!("parquet".parse::<BackendKind>().unwrap(), BackendKind::Parquet);
        assert!("netcdf".parse::<BackendKind>().is_err());
        assert!(BackendKind::default().is_enabled());
        assert!(BackendKind::available().contains(&BackendKind::default()));
    }

    #[test]
    fn validity_display() {
        assert_eq!(Validity::Valid.to_string(), "valid");
        let malformed = Validity::Malformed {
            reason: "not group names: junk".into(),
        };
        assert!(malformed.to_string().contains("junk"));
        assert!(!malformed.is_valid());
    }
}
