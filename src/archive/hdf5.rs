//! HDF5 single-file backend (canonical layout).
//!
//! ```text
//! /<group>                      attrs: date_time (text), date_time_epoch (f64)
//! /<group>/columns/dataframe    f64 [rows, 1 + channels], attrs: columns, widths
//! /<group>/columns/units        one text attr per column
//! /<group>/columns/descriptions one text attr per column
//! /<group>/extras/<tag>         f64 array or text scalar, attr: kind
//! /<group>/extras/units         one text attr per extra
//! /<group>/extras/descriptions  one text attr per extra
//! ```
//!
//! The first dataframe field is `Time` in seconds since the epoch. List-valued
//! attributes are `", "`-joined text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Location};
use ndarray::Array2;

use super::record::{frame_layout, join_list, split_list, GroupRecord};
use super::{Access, ArchiveBackend};
use crate::error::{ArchiveError, ArchiveResult};
use crate::frame::{from_epoch_seconds, to_epoch_seconds, FrameColumn, TimeFrame};
use crate::raw::ExtraValue;

const KIND_TEXT: &str = "text";
const KIND_NUMBER: &str = "number";
const KIND_SEQUENCE: &str = "sequence";

#[derive(Debug)]
pub(crate) struct Hdf5Backend {
    path: PathBuf,
    file: Option<File>,
}

impl Hdf5Backend {
    pub(crate) fn open(path: &Path, access: Access) -> ArchiveResult<Self> {
        let file = match access {
            Access::Read => File::open(path)?,
            Access::Write => File::open_rw(path)?,
            Access::Create => File::create(path)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn file(&self) -> ArchiveResult<&File> {
        self.file.as_ref().ok_or(ArchiveError::Closed)
    }

    fn invalid(&self, group: &str, reason: impl Into<String>) -> ArchiveError {
        ArchiveError::InvalidArchive {
            path: self.path.clone(),
            reason: format!("group {group}: {}", reason.into()),
        }
    }

    fn write_dataframe(&self, columns: &Group, frame: &TimeFrame) -> ArchiveResult<()> {
        let (names, widths) = frame_layout(frame);
        let total: usize = 1 + frame.columns().iter().map(|c| c.values.ncols()).sum::<usize>();
        let mut flat = Vec::with_capacity(frame.len() * total);
        for (row, t) in frame.index().iter().enumerate() {
            flat.push(to_epoch_seconds(t));
            for column in frame.columns() {
                flat.extend(column.values.row(row).iter().copied());
            }
        }

        let dataset = columns
            .new_dataset::<f64>()
            .shape([frame.len(), total])
            .create("dataframe")?;
        dataset.write_raw(&flat)?;
        write_text(&dataset, "columns", &join_list(&names))?;
        write_text(&dataset, "widths", &join_list(&widths))?;
        Ok(())
    }

    fn read_dataframe(&self, group: &str, columns: &Group) -> ArchiveResult<TimeFrame> {
        let dataset = columns.dataset("dataframe")?;
        let names = split_list(&read_text(&dataset, "columns")?);
        let widths = split_list(&read_text(&dataset, "widths")?)
            .iter()
            .map(|w| w.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.invalid(group, format!("bad widths: {e}")))?;
        if names.len() != widths.len() || names.is_empty() {
            return Err(self.invalid(group, "columns and widths disagree"));
        }

        let shape = dataset.shape();
        let rows = shape.first().copied().unwrap_or(0);
        let total = shape.get(1).copied().unwrap_or(1);
        if total != widths.iter().sum::<usize>() {
            return Err(self.invalid(group, "dataframe width does not match its fields"));
        }
        let flat: Vec<f64> = dataset.read_raw()?;
        let table = Array2::from_shape_vec((rows, total), flat)
            .map_err(|e| self.invalid(group, e.to_string()))?;

        let index = table
            .column(0)
            .iter()
            .map(|s| from_epoch_seconds(*s))
            .collect::<ArchiveResult<Vec<_>>>()?;

        let mut offset = widths[0];
        let mut frame_columns = Vec::with_capacity(names.len() - 1);
        for (name, width) in names.iter().zip(&widths).skip(1) {
            let values = table
                .slice(ndarray::s![.., offset..offset + width])
                .to_owned();
            offset += width;
            frame_columns.push(FrameColumn {
                name: name.clone(),
                values,
            });
        }
        TimeFrame::new(index, frame_columns)
    }

    fn write_extras(
        &self,
        extras: &Group,
        values: &BTreeMap<String, ExtraValue>,
    ) -> ArchiveResult<()> {
        for (tag, value) in values {
            match value {
                ExtraValue::Number(v) => {
                    let dataset = extras.new_dataset::<f64>().shape([1]).create(tag.as_str())?;
                    dataset.write_raw(&[*v])?;
                    write_text(&dataset, "kind", KIND_NUMBER)?;
                }
                ExtraValue::Sequence(v) => {
                    let dataset = extras
                        .new_dataset::<f64>()
                        .shape([v.len()])
                        .create(tag.as_str())?;
                    dataset.write_raw(v)?;
                    write_text(&dataset, "kind", KIND_SEQUENCE)?;
                }
                ExtraValue::Text(s) => {
                    let dataset = extras
                        .new_dataset::<VarLenUnicode>()
                        .shape(())
                        .create(tag.as_str())?;
                    dataset.write_scalar(&to_unicode(s)?)?;
                    write_text(&dataset, "kind", KIND_TEXT)?;
                }
            }
        }
        Ok(())
    }

    fn read_extras(&self, extras: &Group) -> ArchiveResult<BTreeMap<String, ExtraValue>> {
        let mut values = BTreeMap::new();
        for dataset in extras.datasets()? {
            let full = dataset.name();
            let tag = full.rsplit('/').next().unwrap_or(full.as_str()).to_string();
            let value = if read_text(&dataset, "kind")? == KIND_TEXT {
                let text: VarLenUnicode = dataset.read_scalar()?;
                ExtraValue::Text(text.as_str().to_string())
            } else {
                ExtraValue::Sequence(dataset.read_raw::<f64>()?)
            };
            values.insert(tag, value);
        }
        Ok(values)
    }
}

fn to_unicode(text: &str) -> ArchiveResult<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|e| ArchiveError::Value(format!("cannot store '{text}' as HDF5 text: {e}")))
}

fn write_text(location: &Location, name: &str, value: &str) -> ArchiveResult<()> {
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&to_unicode(value)?)?;
    Ok(())
}

fn read_text(location: &Location, name: &str) -> ArchiveResult<String> {
    let value: VarLenUnicode = location.attr(name)?.read_scalar()?;
    Ok(value.as_str().to_string())
}

fn write_map(location: &Location, map: &BTreeMap<String, String>) -> ArchiveResult<()> {
    map.iter()
        .try_for_each(|(name, value)| write_text(location, name, value))
}

fn read_map(location: &Location) -> ArchiveResult<BTreeMap<String, String>> {
    location
        .attr_names()?
        .into_iter()
        .map(|name| {
            let value = read_text(location, &name)?;
            Ok((name, value))
        })
        .collect()
}

impl ArchiveBackend for Hdf5Backend {
    fn group_names(&self) -> ArchiveResult<Vec<String>> {
        Ok(self.file()?.member_names()?)
    }

    fn write_group(&mut self, name: &str, record: &GroupRecord) -> ArchiveResult<()> {
        let file = self.file()?;
        if file.link_exists(name) {
            return Err(ArchiveError::GroupExists(name.to_string()));
        }
        let group = file.create_group(name)?;
        write_text(&group, "date_time", &record.nominal_date_time)?;
        if let Some(date_time) = &record.date_time {
            group
                .new_attr::<f64>()
                .create("date_time_epoch")?
                .write_scalar(&to_epoch_seconds(date_time))?;
        }

        let columns = group.create_group("columns")?;
        self.write_dataframe(&columns, &record.frame)?;
        write_map(&columns.create_group("units")?, &record.column_units)?;
        write_map(&columns.create_group("descriptions")?, &record.column_descriptions)?;

        let extras = group.create_group("extras")?;
        self.write_extras(&extras, &record.extras)?;
        write_map(&extras.create_group("units")?, &record.extra_units)?;
        write_map(&extras.create_group("descriptions")?, &record.extra_descriptions)?;

        file.flush()?;
        Ok(())
    }

    fn read_group(&self, name: &str) -> ArchiveResult<GroupRecord> {
        let group = self.file()?.group(name)?;
        let nominal_date_time = read_text(&group, "date_time").unwrap_or_default();
        let date_time = if group.attr_names()?.iter().any(|a| a == "date_time_epoch") {
            let epoch: f64 = group.attr("date_time_epoch")?.read_scalar()?;
            Some(from_epoch_seconds(epoch)?)
        } else {
            None
        };

        let columns = group.group("columns")?;
        let frame = self.read_dataframe(name, &columns)?;
        let extras = group.group("extras")?;

        Ok(GroupRecord {
            date_time,
            nominal_date_time,
            frame,
            column_units: read_map(&columns.group("units")?)?,
            column_descriptions: read_map(&columns.group("descriptions")?)?,
            extras: self.read_extras(&extras)?,
            extra_units: read_map(&extras.group("units")?)?,
            extra_descriptions: read_map(&extras.group("descriptions")?)?,
        })
    }

    fn remove_group(&mut self, name: &str) -> ArchiveResult<()> {
        self.file()?.unlink(name)?;
        Ok(())
    }

    fn close(&mut self) -> ArchiveResult<()> {
        if let Some(file) = self.file.take() {
            file.close()?;
        }
        Ok(())
    }
}
