//! Time-indexed tabular projection of a column dictionary.
//!
//! A [`TimeFrame`] is what gets resampled, merged and persisted. Missing
//! cells are `NaN`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::{Array2, Axis};

use crate::error::{ArchiveError, ArchiveResult};

/// One named column of a frame; several channels share the name.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    /// Tag.
    pub name: String,
    /// Values, rows along axis 0.
    pub values: Array2<f64>,
}

/// Rows indexed by timestamp, columns in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeFrame {
    index: Vec<DateTime<Utc>>,
    columns: Vec<FrameColumn>,
}

impl TimeFrame {
    /// Builds a frame, checking every column has one row per index entry.
    pub fn new(index: Vec<DateTime<Utc>>, columns: Vec<FrameColumn>) -> ArchiveResult<Self> {
        for column in &columns {
            if column.values.nrows() != index.len() {
                return Err(ArchiveError::Shape(format!(
                    "frame column {} has {} rows, index has {}",
                    column.name,
                    column.values.nrows(),
                    index.len()
                )));
            }
        }
        Ok(Self { index, columns })
    }

    /// Row timestamps.
    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    /// Columns in order.
    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    /// Consumes the frame.
    pub fn into_parts(self) -> (Vec<DateTime<Utc>>, Vec<FrameColumn>) {
        (self.index, self.columns)
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Outer join on the time index. Columns of `other` whose name already
    /// exists in `self` are dropped; `self` wins.
    ///
    /// Equal timestamps pair every left row with every right row, so a
    /// timestamp repeated twice on one side and once on the other yields two
    /// rows, both carrying the single right-hand value.
    pub fn outer_join(&self, other: &TimeFrame) -> TimeFrame {
        let mut index = Vec::with_capacity(self.len() + other.len());
        let mut left_rows = Vec::with_capacity(index.capacity());
        let mut right_rows = Vec::with_capacity(index.capacity());

        let (mut i, mut j) = (0, 0);
        while i < self.index.len() || j < other.index.len() {
            let key = match (self.index.get(i), other.index.get(j)) {
                (Some(l), Some(r)) => *l.min(r),
                (Some(l), None) => *l,
                (None, Some(r)) => *r,
                (None, None) => break,
            };
            let left_end = run_end(&self.index, i, key);
            let right_end = run_end(&other.index, j, key);
            match (i < left_end, j < right_end) {
                (true, true) => {
                    for l in i..left_end {
                        for r in j..right_end {
                            index.push(key);
                            left_rows.push(Some(l));
                            right_rows.push(Some(r));
                        }
                    }
                }
                (true, false) => {
                    for l in i..left_end {
                        index.push(key);
                        left_rows.push(Some(l));
                        right_rows.push(None);
                    }
                }
                (false, _) => {
                    for r in j..right_end {
                        index.push(key);
                        left_rows.push(None);
                        right_rows.push(Some(r));
                    }
                }
            }
            i = left_end;
            j = right_end;
        }

        let mut columns: Vec<FrameColumn> = self
            .columns
            .iter()
            .map(|c| realign(c, &left_rows))
            .collect();
        for column in &other.columns {
            if self.column(&column.name).is_some() {
                continue;
            }
            columns.push(realign(column, &right_rows));
        }
        TimeFrame { index, columns }
    }

    /// Mean-aggregates onto a fixed grid of `period`, anchored at midnight
    /// UTC of the first row's day. Empty buckets are `NaN`; only the leading
    /// run of `NaN` in each channel is back-filled from its first value.
    pub fn resample(&self, period: Duration) -> ArchiveResult<TimeFrame> {
        let step = period
            .num_nanoseconds()
            .filter(|n| *n > 0)
            .ok_or_else(|| ArchiveError::Value(format!("invalid resample period {period}")))?;
        let (Some(first), Some(last)) = (self.index.first(), self.index.last()) else {
            return Ok(self.clone());
        };

        let origin = first
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| ArchiveError::Value("cannot anchor resample grid".into()))?;
        let bucket_of = |t: &DateTime<Utc>| -> ArchiveResult<i64> {
            let offset = (*t - origin).num_nanoseconds().ok_or_else(|| {
                ArchiveError::Value(format!("timestamp {t} out of range for resampling"))
            })?;
            Ok(offset.div_euclid(step))
        };

        let first_bucket = bucket_of(first)?;
        let last_bucket = bucket_of(last)?;
        let n_buckets = usize::try_from(last_bucket - first_bucket + 1)
            .map_err(|_| ArchiveError::Value("time index is not ordered".into()))?;
        let buckets: Vec<usize> = self
            .index
            .iter()
            .map(|t| {
                bucket_of(t).and_then(|b| {
                    usize::try_from(b - first_bucket)
                        .map_err(|_| ArchiveError::Value("time index is not ordered".into()))
                })
            })
            .collect::<ArchiveResult<_>>()?;

        let index = (0..n_buckets)
            .map(|k| origin + Duration::nanoseconds((first_bucket + k as i64) * step))
            .collect();

        let columns = self
            .columns
            .iter()
            .map(|column| {
                let width = column.values.ncols();
                let mut sums = Array2::<f64>::zeros((n_buckets, width));
                let mut counts = Array2::<f64>::zeros((n_buckets, width));
                for (row, bucket) in column.values.axis_iter(Axis(0)).zip(&buckets) {
                    for (ch, value) in row.iter().enumerate() {
                        if !value.is_nan() {
                            sums[[*bucket, ch]] += value;
                            counts[[*bucket, ch]] += 1.0;
                        }
                    }
                }
                let mut values = Array2::from_shape_fn((n_buckets, width), |(r, c)| {
                    if counts[[r, c]] > 0.0 {
                        sums[[r, c]] / counts[[r, c]]
                    } else {
                        f64::NAN
                    }
                });
                backfill_leading(&mut values);
                FrameColumn {
                    name: column.name.clone(),
                    values,
                }
            })
            .collect();

        Ok(TimeFrame { index, columns })
    }

    /// Rows from the one nearest `start` up to, not including, the one
    /// nearest `end`.
    pub fn slice_nearest(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> TimeFrame {
        let (Some(from), Some(to)) = (self.nearest_row(start), self.nearest_row(end)) else {
            return self.clone();
        };
        let to = to.max(from);
        TimeFrame {
            index: self.index[from..to].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| FrameColumn {
                    name: c.name.clone(),
                    values: c.values.slice(ndarray::s![from..to, ..]).to_owned(),
                })
                .collect(),
        }
    }

    fn nearest_row(&self, target: DateTime<Utc>) -> Option<usize> {
        let pos = self.index.partition_point(|t| *t < target);
        match (pos.checked_sub(1), self.index.get(pos)) {
            (Some(before), Some(after)) => {
                if target - self.index[before] <= *after - target {
                    Some(before)
                } else {
                    Some(pos)
                }
            }
            (Some(before), None) => Some(before),
            (None, Some(_)) => Some(pos),
            (None, None) => None,
        }
    }
}

/// End of the run of `key` starting at `start`.
fn run_end(index: &[DateTime<Utc>], start: usize, key: DateTime<Utc>) -> usize {
    start + index[start..].iter().take_while(|t| **t == key).count()
}

fn realign(column: &FrameColumn, rows: &[Option<usize>]) -> FrameColumn {
    let width = column.values.ncols();
    let values = Array2::from_shape_fn((rows.len(), width), |(r, c)| match rows[r] {
        Some(src) => column.values[[src, c]],
        None => f64::NAN,
    });
    FrameColumn {
        name: column.name.clone(),
        values,
    }
}

fn backfill_leading(values: &mut Array2<f64>) {
    for mut channel in values.axis_iter_mut(Axis(1)) {
        let Some(first_valid) = channel.iter().position(|v| !v.is_nan()) else {
            continue;
        };
        let fill = channel[first_valid];
        for value in channel.iter_mut().take(first_valid) {
            *value = fill;
        }
    }
}

/// Seconds since the epoch, microsecond resolution.
pub fn to_epoch_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) * 1e-6
}

/// Inverse of [`to_epoch_seconds`], rounded to the microsecond.
pub fn from_epoch_seconds(seconds: f64) -> ArchiveResult<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(ArchiveError::Value(format!("invalid epoch seconds {seconds}")));
    }
    let micros = (seconds * 1e6).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ArchiveError::Value(format!("epoch seconds {seconds} out of range")))
}
