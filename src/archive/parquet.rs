//! Parquet directory-bundle backend.
//!
//! Layout of an archive rooted at `<root>`:
//!
//! ```text
//! <root>/<group>/columns.parquet   Time (epoch seconds) + one Float64 field per channel
//! <root>/<group>/group.json        attributes, units, descriptions, extras
//! ```
//!
//! Multi-channel columns are stored as fields `name[0]`, `name[1]`, ...
//! Missing cells are Parquet nulls. JSON has no NaN or infinity, so
//! non-finite extras are written as the strings `NaN`, `inf` and `-inf`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use super::record::{frame_layout, join_list, split_list, GroupRecord};
use super::{Access, ArchiveBackend};
use crate::error::{ArchiveError, ArchiveResult};
use crate::frame::{from_epoch_seconds, to_epoch_seconds, FrameColumn, TimeFrame};
use crate::raw::{ExtraValue, TIME_KEY};

const COLUMNS_FILE: &str = "columns.parquet";
const GROUP_FILE: &str = "group.json";

/// Contents of `group.json`.
#[derive(Debug, Serialize, Deserialize)]
struct GroupAttributes {
    date_time: String,
    #[serde(default)]
    date_time_epoch: Option<f64>,
    columns: String,
    widths: String,
    #[serde(default)]
    column_units: BTreeMap<String, String>,
    #[serde(default)]
    column_descriptions: BTreeMap<String, String>,
    #[serde(default)]
    extras: BTreeMap<String, StoredExtra>,
    #[serde(default)]
    extra_units: BTreeMap<String, String>,
    #[serde(default)]
    extra_descriptions: BTreeMap<String, String>,
}

/// An extra as kept in `group.json`; the tag keeps numbers and text apart.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
enum StoredExtra {
    Number(StoredFloat),
    Sequence(Vec<StoredFloat>),
    Text(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredFloat {
    Finite(f64),
    NonFinite(String),
}

impl From<f64> for StoredFloat {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            StoredFloat::Finite(value)
        } else {
            StoredFloat::NonFinite(value.to_string())
        }
    }
}

impl StoredFloat {
    fn value(&self) -> Result<f64, String> {
        match self {
            StoredFloat::Finite(v) => Ok(*v),
            StoredFloat::NonFinite(text) => text
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_finite())
                .ok_or_else(|| format!("'{text}' is not a number")),
        }
    }
}

impl From<&ExtraValue> for StoredExtra {
    fn from(value: &ExtraValue) -> Self {
        match value {
            ExtraValue::Number(v) => StoredExtra::Number((*v).into()),
            ExtraValue::Sequence(v) => {
                StoredExtra::Sequence(v.iter().copied().map(Into::into).collect())
            }
            ExtraValue::Text(s) => StoredExtra::Text(s.clone()),
        }
    }
}

impl StoredExtra {
    fn into_extra(self) -> Result<ExtraValue, String> {
        Ok(match self {
            StoredExtra::Number(v) => ExtraValue::Number(v.value()?),
            StoredExtra::Sequence(v) => ExtraValue::Sequence(
                v.iter().map(StoredFloat::value).collect::<Result<_, _>>()?,
            ),
            StoredExtra::Text(s) => ExtraValue::Text(s),
        })
    }
}

#[derive(Debug)]
pub(crate) struct ParquetBackend {
    root: PathBuf,
}

impl ParquetBackend {
    pub(crate) fn open(path: &Path, access: Access) -> ArchiveResult<Self> {
        match access {
            Access::Read | Access::Write => {
                if !path.is_dir() {
                    return Err(ArchiveError::InvalidArchive {
                        path: path.to_path_buf(),
                        reason: "not a directory bundle".into(),
                    });
                }
            }
            Access::Create => {
                if path.is_dir() {
                    fs::remove_dir_all(path)?;
                } else if path.exists() {
                    fs::remove_file(path)?;
                }
                fs::create_dir_all(path)?;
            }
        }
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    fn invalid(&self, group: &str, reason: impl Into<String>) -> ArchiveError {
        ArchiveError::InvalidArchive {
            path: self.root.join(group),
            reason: reason.into(),
        }
    }

    fn write_columns(&self, dir: &Path, record: &GroupRecord) -> ArchiveResult<()> {
        let frame = &record.frame;
        let times: Vec<f64> = frame.index().iter().map(to_epoch_seconds).collect();
        let mut fields = vec![Field::new(TIME_KEY, DataType::Float64, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(times))];

        for column in frame.columns() {
            let width = column.values.ncols();
            let mut metadata = HashMap::new();
            if let Some(unit) = record.column_units.get(&column.name) {
                metadata.insert("unit".to_string(), unit.clone());
            }
            if let Some(desc) = record.column_descriptions.get(&column.name) {
                metadata.insert("description".to_string(), desc.clone());
            }
            for channel in 0..width {
                let values: Vec<Option<f64>> = column
                    .values
                    .column(channel)
                    .iter()
                    .map(|v| (!v.is_nan()).then_some(*v))
                    .collect();
                fields.push(
                    Field::new(field_name(&column.name, channel, width), DataType::Float64, true)
                        .with_metadata(metadata.clone()),
                );
                arrays.push(Arc::new(Float64Array::from(values)));
            }
        }

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(dir.join(COLUMNS_FILE))?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    fn read_columns(&self, group: &str, attrs: &GroupAttributes) -> ArchiveResult<TimeFrame> {
        let file = File::open(self.root.join(group).join(COLUMNS_FILE))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let mut by_field: HashMap<String, Vec<f64>> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| (f.name().clone(), Vec::new()))
            .collect();

        for batch in builder.build()? {
            let batch = batch?;
            let schema = batch.schema();
            for (i, field) in schema.fields().iter().enumerate() {
                let array = batch
                    .column(i)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| {
                        self.invalid(group, format!("field {} is not Float64", field.name()))
                    })?;
                by_field
                    .entry(field.name().clone())
                    .or_default()
                    .extend(array.iter().map(|v| v.unwrap_or(f64::NAN)));
            }
        }

        let mut take = |name: &str| {
            by_field
                .remove(name)
                .ok_or_else(|| self.invalid(group, format!("missing field {name}")))
        };

        let index = take(TIME_KEY)?
            .into_iter()
            .map(from_epoch_seconds)
            .collect::<ArchiveResult<Vec<_>>>()?;
        let rows = index.len();

        let names = split_list(&attrs.columns);
        let widths = split_list(&attrs.widths);
        if names.len() != widths.len() {
            return Err(self.invalid(group, "columns and widths disagree"));
        }
        let mut columns = Vec::new();
        for (name, width) in names.iter().zip(&widths).skip(1) {
            let width: usize = width
                .parse()
                .map_err(|_| self.invalid(group, format!("bad width '{width}' for {name}")))?;
            let channels = (0..width)
                .map(|ch| take(&field_name(name, ch, width)))
                .collect::<ArchiveResult<Vec<_>>>()?;
            if channels.iter().any(|c| c.len() != rows) {
                return Err(self.invalid(group, format!("field {name} has the wrong length")));
            }
            let values = Array2::from_shape_fn((rows, width), |(r, c)| channels[c][r]);
            columns.push(FrameColumn {
                name: name.clone(),
                values,
            });
        }
        TimeFrame::new(index, columns)
    }
}

fn field_name(name: &str, channel: usize, width: usize) -> String {
    if width == 1 {
        name.to_string()
    } else {
        format!("{name}[{channel}]")
    }
}

impl ArchiveBackend for ParquetBackend {
    fn group_names(&self) -> ArchiveResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn write_group(&mut self, name: &str, record: &GroupRecord) -> ArchiveResult<()> {
        let dir = self.root.join(name);
        fs::create_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => ArchiveError::GroupExists(name.to_string()),
            _ => ArchiveError::Io(e),
        })?;

        self.write_columns(&dir, record)?;

        let (names, widths) = frame_layout(&record.frame);
        let attrs = GroupAttributes {
            date_time: record.nominal_date_time.clone(),
            date_time_epoch: record.date_time.as_ref().map(to_epoch_seconds),
            columns: join_list(&names),
            widths: join_list(&widths),
            column_units: record.column_units.clone(),
            column_descriptions: record.column_descriptions.clone(),
            extras: record
                .extras
                .iter()
                .map(|(tag, value)| (tag.clone(), StoredExtra::from(value)))
                .collect(),
            extra_units: record.extra_units.clone(),
            extra_descriptions: record.extra_descriptions.clone(),
        };
        let writer = BufWriter::new(File::create(dir.join(GROUP_FILE))?);
        serde_json::to_writer_pretty(writer, &attrs)?;
        Ok(())
    }

    fn read_group(&self, name: &str) -> ArchiveResult<GroupRecord> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(self.invalid(name, "group is not a directory"));
        }
        let reader = BufReader::new(File::open(dir.join(GROUP_FILE))?);
        let attrs: GroupAttributes = serde_json::from_reader(reader)?;
        let frame = self.read_columns(name, &attrs)?;
        let date_time = attrs.date_time_epoch.map(from_epoch_seconds).transpose()?;
        let extras = attrs
            .extras
            .into_iter()
            .map(|(tag, stored)| {
                let value = stored
                    .into_extra()
                    .map_err(|reason| self.invalid(name, format!("extra {tag}: {reason}")))?;
                Ok((tag, value))
            })
            .collect::<ArchiveResult<_>>()?;

        Ok(GroupRecord {
            date_time,
            nominal_date_time: attrs.date_time,
            frame,
            column_units: attrs.column_units,
            column_descriptions: attrs.column_descriptions,
            extras,
            extra_units: attrs.extra_units,
            extra_descriptions: attrs.extra_descriptions,
        })
    }

    fn remove_group(&mut self, name: &str) -> ArchiveResult<()> {
        fs::remove_dir_all(self.root.join(name))?;
        Ok(())
    }

    fn close(&mut self) -> ArchiveResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_extras_keep_non_finite_numbers() {
        let extras = BTreeMap::from([
            ("Gain".to_string(), ExtraValue::Number(f64::NEG_INFINITY)),
            (
                "BinBoundaries".to_string(),
                ExtraValue::Sequence(vec![0.3, f64::NAN]),
            ),
            ("SerialNumber".to_string(), ExtraValue::Text("inf".into())),
        ]);
        let stored: BTreeMap<String, StoredExtra> = extras
            .iter()
            .map(|(tag, value)| (tag.clone(), StoredExtra::from(value)))
            .collect();
        let json = serde_json::to_string(&stored).unwrap();
        assert!(!json.contains("null"));

        let back: BTreeMap<String, StoredExtra> = serde_json::from_str(&json).unwrap();
        let back: BTreeMap<String, ExtraValue> = back
            .into_iter()
            .map(|(tag, stored)| (tag, stored.into_extra().unwrap()))
            .collect();
        assert_eq!(back["Gain"], ExtraValue::Number(f64::NEG_INFINITY));
        let ExtraValue::Sequence(bounds) = &back["BinBoundaries"] else {
            panic!("expected a sequence");
        };
        assert_eq!(bounds[0], 0.3);
        assert!(bounds[1].is_nan());
        assert_eq!(back["SerialNumber"], ExtraValue::Text("inf".into()));
    }

    #[test]
    fn stored_extras_reject_stray_strings() {
        let stored: StoredExtra =
            serde_json::from_str(r#"{"kind": "number", "value": "banana"}"#).unwrap();
        assert!(stored.into_extra().is_err());
        let stored: StoredExtra =
            serde_json::from_str(r#"{"kind": "number", "value": "2.5"}"#).unwrap();
        assert!(stored.into_extra().is_err());
    }
}
