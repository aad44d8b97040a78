//! Group Collection: ordered measurement instances addressed by group names
//! derived from their acquisition start.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::dict::{ColumnDict, TagMetadata};
use crate::error::{ArchiveError, ArchiveResult};
use crate::frame::TimeFrame;
use crate::raw::ExtraValue;

/// Default group name pattern, e.g. `20220601_090000`.
pub const DEFAULT_GROUP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// strftime pattern group names are formatted with and parsed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNameFormat {
    pattern: String,
}

impl Default for GroupNameFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_GROUP_FORMAT.to_string(),
        }
    }
}

impl GroupNameFormat {
    /// Accepts a pattern only if a formatted timestamp parses back to itself.
    pub fn new(pattern: &str) -> ArchiveResult<Self> {
        if pattern.is_empty() || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
        {
            return Err(ArchiveError::Configuration(format!(
                "'{pattern}' is not a valid timestamp format"
            )));
        }
        let format = Self {
            pattern: pattern.to_string(),
        };
        let probe = NaiveDate::from_ymd_opt(2001, 2, 3)
            .and_then(|d| d.and_hms_opt(4, 5, 6))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ArchiveError::Configuration("invalid probe timestamp".into()))?;
        let name = format.format(&probe)?;
        format.validate(&name).map_err(|_| {
            ArchiveError::Configuration(format!(
                "group format '{pattern}' does not round-trip a full timestamp"
            ))
        })?;
        Ok(format)
    }

    /// The strftime pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Group name for a timestamp.
    pub fn format(&self, date_time: &DateTime<Utc>) -> ArchiveResult<String> {
        format_timestamp(date_time, &self.pattern)
    }

    /// Timestamp encoded in a group name.
    pub fn parse(&self, name: &str) -> ArchiveResult<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(name, &self.pattern)
            .map(|naive| naive.and_utc())
            .map_err(|_| ArchiveError::InvalidGroupName(name.to_string()))
    }

    /// Fails unless the name parses and formats back to exactly itself.
    pub fn validate(&self, name: &str) -> ArchiveResult<DateTime<Utc>> {
        let date_time = self.parse(name)?;
        if self.format(&date_time)? != name {
            return Err(ArchiveError::InvalidGroupName(name.to_string()));
        }
        Ok(date_time)
    }

    /// True when [`GroupNameFormat::validate`] accepts the name.
    pub fn is_valid(&self, name: &str) -> bool {
        self.validate(name).is_ok()
    }
}

/// Formats a timestamp, reporting a bad pattern instead of panicking.
pub(crate) fn format_timestamp(date_time: &DateTime<Utc>, pattern: &str) -> ArchiveResult<String> {
    let mut out = String::new();
    write!(out, "{}", date_time.format(pattern))
        .map_err(|_| ArchiveError::Configuration(format!("cannot format with '{pattern}'")))?;
    Ok(out)
}

/// Ordered instances with parallel group names and start timestamps.
#[derive(Debug, Clone)]
pub struct GroupCollection {
    instances: Vec<ColumnDict>,
    group_names: Vec<String>,
    date_times: Vec<DateTime<Utc>>,
    format: GroupNameFormat,
}

impl GroupCollection {
    /// Empty collection.
    pub fn empty(format: GroupNameFormat) -> Self {
        Self {
            instances: Vec::new(),
            group_names: Vec::new(),
            date_times: Vec::new(),
            format,
        }
    }

    /// Collection with names derived from each instance's `date_time`.
    pub fn new(instances: Vec<ColumnDict>, format: GroupNameFormat) -> ArchiveResult<Self> {
        let mut collection = Self::empty(format);
        for instance in instances {
            collection.push(instance)?;
        }
        Ok(collection)
    }

    /// Collection under explicit names, e.g. as read back from an archive.
    pub fn from_named(
        named: Vec<(String, ColumnDict)>,
        format: GroupNameFormat,
    ) -> ArchiveResult<Self> {
        let mut collection = Self::empty(format);
        for (name, instance) in named {
            collection.format.validate(&name)?;
            collection.date_times.push(instance.date_time());
            collection.group_names.push(name);
            collection.instances.push(instance);
        }
        collection.validate()?;
        Ok(collection)
    }

    /// Appends an instance.
    pub fn push(&mut self, instance: ColumnDict) -> ArchiveResult<()> {
        let name = self.format.format(&instance.date_time())?;
        self.format.validate(&name)?;
        self.date_times.push(instance.date_time());
        self.group_names.push(name);
        self.instances.push(instance);
        Ok(())
    }

    /// Concatenates two collections, re-deriving and re-validating every
    /// group name under `self`'s format.
    pub fn combine(&self, other: &GroupCollection) -> ArchiveResult<GroupCollection> {
        let instances = self
            .instances
            .iter()
            .chain(&other.instances)
            .cloned()
            .collect();
        let combined = Self::new(instances, self.format.clone())?;
        combined.validate()?;
        Ok(combined)
    }

    /// Checks the parallel lists agree and every name is well formed.
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.group_names.len() != self.instances.len()
            || self.date_times.len() != self.instances.len()
        {
            return Err(ArchiveError::Value(format!(
                "collection has {} instances but {} group names",
                self.instances.len(),
                self.group_names.len()
            )));
        }
        self.group_names
            .iter()
            .try_for_each(|name| self.format.validate(name).map(|_| ()))
    }

    /// Group name format.
    pub fn format(&self) -> &GroupNameFormat {
        &self.format
    }

    /// Group names in order.
    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    /// Start timestamps in order.
    pub fn date_times(&self) -> &[DateTime<Utc>] {
        &self.date_times
    }

    /// Instances in order.
    pub fn instances(&self) -> &[ColumnDict] {
        &self.instances
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True when there are no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instance stored under a group name.
    pub fn get(&self, name: &str) -> Option<&ColumnDict> {
        self.group_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.instances[i])
    }

    /// `(group name, instance)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnDict)> {
        self.group_names
            .iter()
            .map(String::as_str)
            .zip(&self.instances)
    }

    /// Tabular projection of every instance.
    pub fn to_tables(&self, period: Option<Duration>) -> ArchiveResult<Vec<TimeFrame>> {
        self.instances.iter().map(|i| i.to_table(period)).collect()
    }

    /// Column units and descriptions per group.
    pub fn metadata_by_group(&self) -> ArchiveResult<BTreeMap<String, TagMetadata>> {
        self.iter()
            .map(|(name, i)| Ok((name.to_string(), i.column_metadata()?)))
            .collect()
    }

    /// Extras per group.
    pub fn extras_by_group(&self) -> BTreeMap<String, BTreeMap<String, ExtraValue>> {
        self.iter()
            .map(|(name, i)| (name.to_string(), i.extras().clone()))
            .collect()
    }

    /// Extras units and descriptions per group.
    pub fn extras_metadata_by_group(&self) -> ArchiveResult<BTreeMap<String, TagMetadata>> {
        self.iter()
            .map(|(name, i)| Ok((name.to_string(), i.extras_metadata()?)))
            .collect()
    }
}
