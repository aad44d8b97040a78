//! Backend-neutral stored form of one group.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::collection::format_timestamp;
use crate::dict::ColumnDict;
use crate::error::ArchiveResult;
use crate::frame::TimeFrame;
use crate::raw::{ExtraValue, RawRecord, RawValue, UnitSpec};
use crate::registry::FlagRegistry;

/// Everything persisted for one measurement instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    /// Acquisition start; `None` when the store carried no epoch attribute.
    pub date_time: Option<DateTime<Utc>>,
    /// Acquisition start in the nominal format, stored as a readable attribute.
    pub nominal_date_time: String,
    /// Table written to the `columns` area.
    pub frame: TimeFrame,
    /// Column units.
    pub column_units: BTreeMap<String, String>,
    /// Column descriptions.
    pub column_descriptions: BTreeMap<String, String>,
    /// Non time-series values.
    pub extras: BTreeMap<String, ExtraValue>,
    /// Extras units.
    pub extra_units: BTreeMap<String, String>,
    /// Extras descriptions.
    pub extra_descriptions: BTreeMap<String, String>,
}

impl GroupRecord {
    /// Projects an instance for writing, resampled onto `timestep` if given.
    pub fn from_dict(
        dict: &ColumnDict,
        timestep: Option<Duration>,
        nominal_format: &str,
    ) -> ArchiveResult<Self> {
        let frame = dict.to_table(timestep)?;
        let columns = dict.column_metadata()?;
        let extras = dict.extras_metadata()?;
        Ok(Self {
            date_time: Some(dict.date_time()),
            nominal_date_time: format_timestamp(&dict.date_time(), nominal_format)?,
            frame,
            column_units: columns.units,
            column_descriptions: columns.descriptions,
            extras: dict.extras().clone(),
            extra_units: extras.units,
            extra_descriptions: extras.descriptions,
        })
    }

    /// Rebuilds a column dictionary. Stored units become the unit spec, so a
    /// registry whose canonical units changed since writing converts on read.
    /// `fallback_date_time` (parsed from the group name) is used when the
    /// record has no start timestamp.
    pub fn into_dict(
        self,
        fallback_date_time: DateTime<Utc>,
        registry: Arc<FlagRegistry>,
    ) -> ArchiveResult<ColumnDict> {
        let date_time = self.date_time.unwrap_or(fallback_date_time);
        let (index, columns) = self.frame.into_parts();
        let mut record = RawRecord::with_time(date_time, index);
        for column in columns {
            record.insert(&column.name, RawValue::Column(column.values));
        }
        for (tag, value) in self.extras {
            record.insert(&tag, value.normalized());
        }

        let mut units = self.column_units;
        units.extend(self.extra_units);
        let unit_spec = if units.is_empty() {
            UnitSpec::Default
        } else {
            UnitSpec::Explicit(units)
        };
        ColumnDict::from_raw(record, unit_spec, registry)
    }
}

/// Separator for list-valued attributes.
pub(crate) const LIST_SEPARATOR: &str = ", ";

/// Joins a list for storage in a text attribute.
pub(crate) fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Inverse of [`join_list`].
pub(crate) fn split_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(LIST_SEPARATOR).map(str::to_string).collect()
}

/// Column names and channel widths of a frame, with `Time` first.
pub(crate) fn frame_layout(frame: &TimeFrame) -> (Vec<String>, Vec<String>) {
    let mut names = vec![crate::raw::TIME_KEY.to_string()];
    let mut widths = vec!["1".to_string()];
    for column in frame.columns() {
        names.push(column.name.clone());
        widths.push(column.values.ncols().to_string());
    }
    (names, widths)
}
