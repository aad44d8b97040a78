//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/flight_archive.toml` (base configuration)
//! 2. Environment variables prefixed with `FLIGHT_ARCHIVE_`, nested keys
//!    separated by `__` (e.g. `FLIGHT_ARCHIVE_APPLICATION__LOG_LEVEL=debug`)
//!
//! The `registry.flags` table is the flag registry every ingest validates
//! against.
//!
//! # Example
//! ```no_run
//! use flight_archive::config::ArchiveConfig;
//!
//! let config = ArchiveConfig::load()?;
//! config.validate()?;
//! let registry = config.flag_registry()?;
//! # Ok::<(), flight_archive::error::ArchiveError>(())
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveSettings, BackendKind, DEFAULT_NOMINAL_FORMAT};
use crate::collection::{format_timestamp, GroupNameFormat, DEFAULT_GROUP_FORMAT};
use crate::error::{ArchiveError, ArchiveResult};
use crate::registry::{FlagDefinition, FlagRegistry, DEFAULT_TAG_SUFFIX};
use crate::units::UnitSystem;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/flight_archive.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLIGHT_ARCHIVE_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Archive layout and storage settings
    #[serde(default)]
    pub archive: ArchiveSection,
    /// Flag registry
    #[serde(default)]
    pub registry: RegistrySection,
    /// Extra unit definitions
    #[serde(default)]
    pub units: UnitsSection,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSection {
    /// strftime pattern of group names
    #[serde(default = "default_group_format")]
    pub group_dt_format: String,
    /// strftime pattern of the readable `date_time` group attribute
    #[serde(default = "default_nominal_format")]
    pub nominal_dt_format: String,
    /// Write-time resample period in seconds (0 disables resampling)
    #[serde(default = "default_timestep")]
    pub timestep_secs: f64,
    /// Storage backend (hdf5 or parquet)
    #[serde(default)]
    pub backend: BackendKind,
    /// Root that relative archive names resolve under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_data_path: Option<PathBuf>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            group_dt_format: default_group_format(),
            nominal_dt_format: default_nominal_format(),
            timestep_secs: default_timestep(),
            backend: BackendKind::default(),
            base_data_path: None,
        }
    }
}

/// Flag registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Token replacing an embedded index in generic tags
    #[serde(default = "default_tag_suffix")]
    pub tag_suffix: String,
    /// Valid tags
    #[serde(default)]
    pub flags: Vec<FlagDefinition>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            tag_suffix: default_tag_suffix(),
            flags: Vec::new(),
        }
    }
}

/// Unit definitions extending the built-in table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitsSection {
    /// Unit name to defining expression, e.g. `kts = "knot"`
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
}

// Default value functions
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_group_format() -> String {
    DEFAULT_GROUP_FORMAT.to_string()
}

fn default_nominal_format() -> String {
    DEFAULT_NOMINAL_FORMAT.to_string()
}

fn default_timestep() -> f64 {
    1.0
}

fn default_tag_suffix() -> String {
    DEFAULT_TAG_SUFFIX.to_string()
}

impl ArchiveConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> ArchiveResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> ArchiveResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ArchiveResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ArchiveError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(ArchiveError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            )));
        }

        if !self.archive.backend.is_enabled() {
            return Err(ArchiveError::FeatureNotEnabled(
                self.archive.backend.feature().to_string(),
            ));
        }

        if !self.archive.timestep_secs.is_finite() || self.archive.timestep_secs < 0.0 {
            return Err(ArchiveError::Configuration(format!(
                "Invalid timestep_secs {}. Must be >= 0",
                self.archive.timestep_secs
            )));
        }

        GroupNameFormat::new(&self.archive.group_dt_format)?;
        format_timestamp(&DateTime::<Utc>::UNIX_EPOCH, &self.archive.nominal_dt_format)?;

        let mut names = HashSet::new();
        for flag in &self.registry.flags {
            if !names.insert(&flag.name) {
                return Err(ArchiveError::Configuration(format!(
                    "Duplicate flag name: {}",
                    flag.name
                )));
            }
        }

        // Parses every definition and canonical unit.
        self.flag_registry()?;
        Ok(())
    }

    /// Built-in units plus the configured definitions.
    pub fn unit_system(&self) -> ArchiveResult<UnitSystem> {
        let mut units = UnitSystem::new();
        for (name, expression) in &self.units.definitions {
            units.define(name, expression)?;
        }
        Ok(units)
    }

    /// The flag registry described by the configuration.
    pub fn flag_registry(&self) -> ArchiveResult<FlagRegistry> {
        FlagRegistry::new(
            self.registry.flags.clone(),
            &self.registry.tag_suffix,
            self.unit_system()?,
        )
    }

    /// Write-time resample period; `None` when resampling is disabled.
    pub fn timestep(&self) -> Option<Duration> {
        let micros = (self.archive.timestep_secs * 1e6).round() as i64;
        (micros > 0).then(|| Duration::microseconds(micros))
    }

    /// Archive settings derived from the `archive` section.
    pub fn archive_settings(&self) -> ArchiveResult<ArchiveSettings> {
        Ok(ArchiveSettings {
            group_format: GroupNameFormat::new(&self.archive.group_dt_format)?,
            nominal_format: self.archive.nominal_dt_format.clone(),
            timestep: self.timestep(),
            backend: self.archive.backend,
        })
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> ArchiveResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ArchiveError::Configuration(format!("cannot render configuration: {e}")))
    }

    /// Resolves an archive name. Relative names go under
    /// `<base_data_path>/Processed/` when a base path is configured.
    pub fn resolve_archive_path(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        match &self.archive.base_data_path {
            Some(base) if name.is_relative() => base.join("Processed").join(name),
            _ => name.to_path_buf(),
        }
    }
}
