//! Data Structure base: acquisition start plus the time index every column is
//! measured against.
//!
//! Specialisations embed a [`DataStructure`] and run their own initialisation
//! steps after [`DataStructure::from_record`] has consumed the two mandatory
//! keys, so layering is explicit composition.

use chrono::{DateTime, Utc};

use crate::column::TypedColumn;
use crate::error::{ArchiveError, ArchiveResult};
use crate::raw::{RawRecord, RawValue, DATE_TIME_KEY, TIME_KEY};

/// Time base shared by all columns of one measurement instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStructure {
    date_time: DateTime<Utc>,
    time: Vec<DateTime<Utc>>,
}

impl DataStructure {
    /// Builds the time base, rejecting an unordered index.
    pub fn new(date_time: DateTime<Utc>, time: Vec<DateTime<Utc>>) -> ArchiveResult<Self> {
        if let Some(pos) = time.windows(2).position(|w| w[1] < w[0]) {
            return Err(ArchiveError::Value(format!(
                "Time is not ordered at row {}",
                pos + 1
            )));
        }
        Ok(Self { date_time, time })
    }

    /// Takes `date_time` and `Time` out of a raw record, returning the time
    /// base and the remaining entries.
    pub fn from_record(mut record: RawRecord) -> ArchiveResult<(Self, RawRecord)> {
        let date_time = match record.take(DATE_TIME_KEY) {
            Some(RawValue::Timestamp(dt)) => dt,
            Some(other) => {
                return Err(ArchiveError::Type(format!(
                    "{DATE_TIME_KEY} must be a timestamp, got {}",
                    other.kind()
                )))
            }
            None => {
                return Err(ArchiveError::Type(format!(
                    "raw record has no {DATE_TIME_KEY}"
                )))
            }
        };
        let time = match record.take(TIME_KEY) {
            Some(RawValue::TimeIndex(time)) => time,
            Some(other) => {
                return Err(ArchiveError::Type(format!(
                    "{TIME_KEY} must be a timestamp sequence, got {}",
                    other.kind()
                )))
            }
            None => return Err(ArchiveError::Type(format!("raw record has no {TIME_KEY}"))),
        };
        Ok((Self::new(date_time, time)?, record))
    }

    /// Acquisition start.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    /// Row index.
    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    /// Length of the time index.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True when the index is empty.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Replaces the acquisition start.
    pub fn with_date_time(&self, date_time: DateTime<Utc>) -> Self {
        Self {
            date_time,
            time: self.time.clone(),
        }
    }

    /// Checks every column has one row per index entry.
    pub fn self_check<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a TypedColumn>,
    ) -> ArchiveResult<()> {
        columns
            .into_iter()
            .try_for_each(|column| column.check_length(self.len()))
    }
}
