//! Column Dictionary: the validated, unit-converted container for one
//! measurement instance.
//!
//! Ingest classifies each raw value as a time-series column or as extra
//! (non time-series) metadata, converts it to the registry's canonical unit
//! and checks the tag is registered. Two dictionaries combine by outer-joining
//! their time indices.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use tracing::{debug, info};

use crate::column::TypedColumn;
use crate::error::{ArchiveError, ArchiveResult};
use crate::frame::{FrameColumn, TimeFrame};
use crate::raw::{ExtraValue, RawRecord, RawValue, UnitSpec, DATE_TIME_KEY, TIME_KEY};
use crate::registry::FlagRegistry;
use crate::structure::DataStructure;

/// Units and descriptions of the tags populated in one instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagMetadata {
    /// Tag to canonical unit.
    pub units: BTreeMap<String, String>,
    /// Tag to description.
    pub descriptions: BTreeMap<String, String>,
}

impl TagMetadata {
    fn insert(&mut self, tag: &str, unit: &str, description: &str) {
        self.units.insert(tag.to_string(), unit.to_string());
        self.descriptions
            .insert(tag.to_string(), description.to_string());
    }
}

/// One measurement instance.
#[derive(Debug, Clone)]
pub struct ColumnDict {
    base: DataStructure,
    columns: Vec<TypedColumn>,
    non_col: BTreeMap<String, ExtraValue>,
    unit_spec: UnitSpec,
    registry: Arc<FlagRegistry>,
}

/// Resolves whether a tag needs converting under a unit spec.
struct UnitResolver<'a> {
    registry: &'a FlagRegistry,
    unit_spec: &'a UnitSpec,
}

impl UnitResolver<'_> {
    /// `Some((from, to))` when a conversion is required.
    fn target(&self, tag: &str) -> ArchiveResult<Option<(String, String)>> {
        if self.unit_spec.is_default() {
            self.registry.check(tag)?;
            return Ok(None);
        }
        let Some(from) = self.unit_spec.unit_for(tag) else {
            debug!(tag, "no unit to convert");
            return Ok(None);
        };
        let to = self.registry.canonical_unit(tag)?;
        if from == to {
            debug!(tag, unit = to, "already at canonical unit");
            return Ok(None);
        }
        info!(tag, from, to, "converting units");
        Ok(Some((from.to_string(), to.to_string())))
    }

    fn column(&self, tag: &str, values: Array2<f64>) -> ArchiveResult<Array2<f64>> {
        match self.target(tag)? {
            Some((from, to)) => self.registry.units().convert_array(values, &from, &to),
            None => Ok(values),
        }
    }

    fn extra(&self, tag: &str, value: ExtraValue) -> ArchiveResult<ExtraValue> {
        let Some((from, to)) = self.target(tag)? else {
            return Ok(value);
        };
        let units = self.registry.units();
        match value {
            ExtraValue::Number(v) => Ok(ExtraValue::Number(units.convert(v, &from, &to)?)),
            ExtraValue::Sequence(v) => {
                Ok(ExtraValue::Sequence(units.convert_slice(&v, &from, &to)?))
            }
            ExtraValue::Text(_) => Err(ArchiveError::Type(format!(
                "{tag} is text and cannot be converted from {from} to {to}"
            ))),
        }
    }
}

impl ColumnDict {
    /// Ingests a raw record.
    ///
    /// The record must hold `date_time` and `Time`. Arrays become columns of
    /// `Time`'s length, already typed columns are kept, and numbers, lists and
    /// text become extras. Every tag must be registered.
    pub fn from_raw(
        record: RawRecord,
        unit_spec: UnitSpec,
        registry: Arc<FlagRegistry>,
    ) -> ArchiveResult<Self> {
        if let UnitSpec::Explicit(map) = &unit_spec {
            if map.is_empty() {
                return Err(ArchiveError::Value("No units specified".into()));
            }
        }
        for tag in unit_spec.tags() {
            if tag != TIME_KEY && tag != DATE_TIME_KEY {
                registry.check(tag)?;
            }
        }

        let (base, rest) = DataStructure::from_record(record)?;
        let mut dict = Self {
            base,
            columns: Vec::new(),
            non_col: BTreeMap::new(),
            unit_spec,
            registry,
        };
        for (tag, value) in rest {
            dict.ingest(&tag, value)?;
        }
        dict.base.self_check(&dict.columns)?;
        Ok(dict)
    }

    /// Ingests with the `"default"` unit spec.
    pub fn from_canonical(record: RawRecord, registry: Arc<FlagRegistry>) -> ArchiveResult<Self> {
        Self::from_raw(record, UnitSpec::Default, registry)
    }

    fn resolver(&self) -> UnitResolver<'_> {
        UnitResolver {
            registry: &self.registry,
            unit_spec: &self.unit_spec,
        }
    }

    fn ingest(&mut self, tag: &str, value: RawValue) -> ArchiveResult<()> {
        let extra = match value {
            RawValue::Column(values) => {
                let values = self.resolver().column(tag, values)?;
                let column = TypedColumn::new(Some(tag), values, self.len(), &self.registry)?;
                return self.put_column(tag, column);
            }
            RawValue::Typed(column) if column.name() == Some(tag) => {
                return self.put_column(tag, column);
            }
            RawValue::Typed(column) => {
                let column =
                    TypedColumn::new(Some(tag), column.into_values(), self.len(), &self.registry)?;
                return self.put_column(tag, column);
            }
            RawValue::Number(v) => ExtraValue::Number(v),
            RawValue::Sequence(v) => ExtraValue::Sequence(v),
            RawValue::Text(v) => ExtraValue::Text(v),
            other @ (RawValue::Timestamp(_) | RawValue::TimeIndex(_)) => {
                return Err(ArchiveError::Type(format!(
                    "{tag} holds a {}, which is only valid under {DATE_TIME_KEY} or {TIME_KEY}",
                    other.kind()
                )))
            }
        };
        self.registry.check(tag)?;
        let extra = self.resolver().extra(tag, extra)?;
        self.columns.retain(|c| c.name() != Some(tag));
        self.non_col.insert(tag.to_string(), extra);
        Ok(())
    }

    fn put_column(&mut self, tag: &str, column: TypedColumn) -> ArchiveResult<()> {
        column.check_length(self.len())?;
        self.non_col.remove(tag);
        match self.columns.iter_mut().find(|c| c.name() == Some(tag)) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Acquisition start.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.base.date_time()
    }

    /// Row index.
    pub fn time(&self) -> &[DateTime<Utc>] {
        self.base.time()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[TypedColumn] {
        &self.columns
    }

    /// Column by tag.
    pub fn column(&self, tag: &str) -> Option<&TypedColumn> {
        self.columns.iter().find(|c| c.name() == Some(tag))
    }

    /// Extras by tag.
    pub fn extras(&self) -> &BTreeMap<String, ExtraValue> {
        &self.non_col
    }

    /// One extra.
    pub fn extra(&self, tag: &str) -> Option<&ExtraValue> {
        self.non_col.get(tag)
    }

    /// Unit spec the instance was ingested with.
    pub fn unit_spec(&self) -> &UnitSpec {
        &self.unit_spec
    }

    /// Registry the instance validates against.
    pub fn registry(&self) -> &Arc<FlagRegistry> {
        &self.registry
    }

    /// Number of columns plus extras.
    pub fn entry_count(&self) -> usize {
        self.columns.len() + self.non_col.len()
    }

    /// Validates every column against the registry and the time index.
    pub fn self_check(&self) -> ArchiveResult<()> {
        for column in &self.columns {
            match column.name() {
                Some(tag) => self.registry.check(tag)?,
                None => {
                    return Err(ArchiveError::Lookup(
                        "anonymous column in column dictionary".into(),
                    ))
                }
            }
        }
        self.base.self_check(&self.columns)
    }

    /// Tabular projection in column insertion order, optionally resampled
    /// onto a fixed `period` grid.
    pub fn to_table(&self, period: Option<Duration>) -> ArchiveResult<TimeFrame> {
        self.self_check()?;
        let columns = self
            .columns
            .iter()
            .map(|c| FrameColumn {
                name: c.name().unwrap_or_default().to_string(),
                values: c.values().clone(),
            })
            .collect();
        let frame = TimeFrame::new(self.time().to_vec(), columns)?;
        match period {
            Some(period) => frame.resample(period),
            None => Ok(frame),
        }
    }

    /// Merges two instances on the union of their time indices.
    ///
    /// Columns present in both keep `self`'s values. Extras are unioned with
    /// `other` winning. The result keeps `self`'s `date_time`; cells with no
    /// source sample are `NaN`.
    pub fn combine(&self, other: &ColumnDict) -> ArchiveResult<ColumnDict> {
        let joined = self.to_table(None)?.outer_join(&other.to_table(None)?);
        let (index, frame_columns) = joined.into_parts();
        let base = DataStructure::new(self.date_time(), index)?;

        let columns = frame_columns
            .into_iter()
            .map(|c| TypedColumn::new(Some(&c.name), c.values, base.len(), &self.registry))
            .collect::<ArchiveResult<Vec<_>>>()?;

        let mut non_col = self.non_col.clone();
        non_col.extend(other.non_col.iter().map(|(k, v)| (k.clone(), v.clone())));
        for tag in columns.iter().filter_map(TypedColumn::name) {
            non_col.remove(tag);
        }

        debug!(
            rows = base.len(),
            columns = columns.len(),
            extras = non_col.len(),
            "combined column dictionaries"
        );
        Ok(ColumnDict {
            base,
            columns,
            non_col,
            unit_spec: UnitSpec::Default,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Adds extras. Every key needs an entry in `units`; the unit spec is
    /// extended and the values converted.
    pub fn with_extras(
        mut self,
        values: impl IntoIterator<Item = (String, ExtraValue)>,
        units: BTreeMap<String, String>,
    ) -> ArchiveResult<Self> {
        let values: Vec<(String, ExtraValue)> = values.into_iter().collect();
        if let Some((tag, _)) = values.iter().find(|(k, _)| !units.contains_key(k)) {
            return Err(ArchiveError::Value(format!("unit for {tag} not specified")));
        }
        for tag in units.keys() {
            self.registry.check(tag)?;
        }
        self.unit_spec = self.unit_spec.merged(&UnitSpec::Explicit(units));
        for (tag, value) in values {
            if tag == TIME_KEY {
                continue;
            }
            self.ingest(&tag, value.into())?;
        }
        Ok(self)
    }

    /// Drops a column or extra. Returns whether anything was removed.
    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c.name() != Some(tag));
        let removed_column = self.columns.len() != before;
        self.non_col.remove(tag).is_some() || removed_column
    }

    /// Rows between the ones nearest `start` and `end`, end exclusive.
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ArchiveResult<TimeFrame> {
        Ok(self.to_table(None)?.slice_nearest(start, end))
    }

    /// Copy with a new acquisition start.
    pub fn with_date_time(&self, date_time: DateTime<Utc>) -> Self {
        Self {
            base: self.base.with_date_time(date_time),
            ..self.clone()
        }
    }

    /// Units and descriptions of the populated columns.
    pub fn column_metadata(&self) -> ArchiveResult<TagMetadata> {
        let mut meta = TagMetadata::default();
        for tag in self.columns.iter().filter_map(TypedColumn::name) {
            let flag = self.registry.lookup(tag)?;
            meta.insert(tag, &flag.unit, &flag.desc);
        }
        Ok(meta)
    }

    /// Units and descriptions of the populated extras.
    pub fn extras_metadata(&self) -> ArchiveResult<TagMetadata> {
        let mut meta = TagMetadata::default();
        for tag in self.non_col.keys() {
            let flag = self.registry.lookup(tag)?;
            meta.insert(tag, &flag.unit, &flag.desc);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::sample_registry;
    use chrono::TimeZone;
    use ndarray::array;
    use tracing_test::traced_test;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, 1, 9, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn registry() -> Arc<FlagRegistry> {
        Arc::new(sample_registry())
    }

    fn flight_a() -> ColumnDict {
        let record = RawRecord::with_time(t(0), vec![t(0), t(1000), t(2000)])
            .with("Airspeed", array![10.0, 11.0, 12.0])
            .with("SerialNumber", 1234.0);
        ColumnDict::from_canonical(record, registry()).unwrap()
    }

    fn flight_b() -> ColumnDict {
        let record = RawRecord::with_time(t(500), vec![t(500), t(1500)])
            .with("Pitch", array![1.0, 2.0])
            .with("Gain", 2.5);
        ColumnDict::from_canonical(record, registry()).unwrap()
    }

    #[test]
    fn classifies_columns_and_extras() {
        let dict = flight_a();
        assert_eq!(dict.columns().len(), 1);
        assert_eq!(dict.extra("SerialNumber"), Some(&ExtraValue::Number(1234.0)));
        assert_eq!(dict.entry_count(), 2);
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn converts_hpa_to_pa() {
        let record = RawRecord::with_time(t(0), vec![t(0), t(1000)])
            .with("Pressure", array![1013.25, 1000.0]);
        let dict = ColumnDict::from_raw(
            record,
            UnitSpec::explicit([("Pressure", "hPa")]),
            registry(),
        )
        .unwrap();
        let values = dict.column("Pressure").unwrap().values();
        assert_eq!(values[[0, 0]], 101325.0);
        assert_eq!(values[[1, 0]], 100000.0);
    }

    #[test]
    fn canonical_unit_is_exact_identity() {
        let raw = array![0.1, 0.2, 0.30000000000000004];
        let record =
            RawRecord::with_time(t(0), vec![t(0), t(1), t(2)]).with("Airspeed", raw.clone());
        let dict =
            ColumnDict::from_raw(record, UnitSpec::explicit([("Airspeed", "m/s")]), registry())
                .unwrap();
        let stored = dict.column("Airspeed").unwrap().channel(0).unwrap().to_owned();
        assert_eq!(stored, raw);
    }

    #[test]
    #[traced_test]
    fn missing_unit_entry_passes_through() {
        let record = RawRecord::with_time(t(0), vec![t(0)])
            .with("Pressure", array![5.0])
            .with("Pitch", array![1.0]);
        let dict =
            ColumnDict::from_raw(record, UnitSpec::explicit([("Pressure", "hPa")]), registry())
                .unwrap();
        assert_eq!(dict.column("Pitch").unwrap().values()[[0, 0]], 1.0);
        assert!(logs_contain("no unit to convert"));
    }

    #[test]
    fn incompatible_units_fail() {
        let record = RawRecord::with_time(t(0), vec![t(0)]).with("Pressure", array![5.0]);
        let err = ColumnDict::from_raw(record, UnitSpec::explicit([("Pressure", "m")]), registry())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Unit(_)));
    }

    #[test]
    fn unknown_tags_fail_fast() {
        let record = RawRecord::with_time(t(0), vec![t(0)]).with("Bogus", array![5.0]);
        assert!(matches!(
            ColumnDict::from_canonical(record, registry()),
            Err(ArchiveError::Lookup(_))
        ));
        let record = RawRecord::with_time(t(0), vec![t(0)]).with("Bogus", "x");
        assert!(matches!(
            ColumnDict::from_canonical(record, registry()),
            Err(ArchiveError::Lookup(_))
        ));
        let record = RawRecord::with_time(t(0), vec![t(0)]);
        assert!(matches!(
            ColumnDict::from_raw(record, UnitSpec::explicit([("Bogus", "m")]), registry()),
            Err(ArchiveError::Lookup(_))
        ));
    }

    #[test]
    fn empty_unit_spec_is_rejected() {
        let record = RawRecord::with_time(t(0), vec![t(0)]);
        let err = ColumnDict::from_raw(record, UnitSpec::Explicit(BTreeMap::new()), registry())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Value(_)));
    }

    #[test]
    fn column_length_must_match_time() {
        let record = RawRecord::with_time(t(0), vec![t(0), t(1000)]).with("Pitch", array![1.0]);
        assert!(matches!(
            ColumnDict::from_canonical(record, registry()),
            Err(ArchiveError::Shape(_))
        ));
    }

    #[test]
    fn typed_columns_are_kept() {
        let reg = registry();
        let col = TypedColumn::from_vec(Some("Roll"), vec![3.0, 4.0], &reg).unwrap();
        let record = RawRecord::with_time(t(0), vec![t(0), t(1000)]).with("Roll", col.clone());
        let dict = ColumnDict::from_canonical(record, reg).unwrap();
        assert_eq!(dict.column("Roll"), Some(&col));
    }

    #[test]
    fn combine_outer_joins_time() {
        let merged = flight_a().combine(&flight_b()).unwrap();
        assert_eq!(merged.time(), &[t(0), t(500), t(1000), t(1500), t(2000)]);
        let airspeed = merged.column("Airspeed").unwrap().values();
        assert_eq!(airspeed[[0, 0]], 10.0);
        assert!(airspeed[[1, 0]].is_nan());
        assert_eq!(airspeed[[2, 0]], 11.0);
        let pitch = merged.column("Pitch").unwrap().values();
        assert!(pitch[[0, 0]].is_nan());
        assert_eq!(pitch[[1, 0]], 1.0);
        assert_eq!(merged.extras().len(), 2);
        assert_eq!(merged.date_time(), t(0));
    }

    #[test]
    fn combine_keeps_first_source_on_collision() {
        let a = flight_a();
        let record = RawRecord::with_time(t(0), vec![t(0), t(1000)])
            .with("Airspeed", array![99.0, 98.0])
            .with("SerialNumber", 42.0);
        let b = ColumnDict::from_canonical(record, registry()).unwrap();
        let merged = a.combine(&b).unwrap();
        let airspeed = merged.column("Airspeed").unwrap().values();
        assert_eq!(airspeed.column(0).to_vec(), vec![10.0, 11.0, 12.0]);
        assert_eq!(merged.extra("SerialNumber"), Some(&ExtraValue::Number(42.0)));
    }

    #[test]
    fn to_table_resamples() {
        let record = RawRecord::with_time(t(0), vec![t(0), t(250), t(1250)])
            .with("Pitch", array![1.0, 3.0, 5.0]);
        let dict = ColumnDict::from_canonical(record, registry()).unwrap();
        let frame = dict.to_table(Some(Duration::seconds(1))).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("Pitch").unwrap().values.column(0).to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn extras_need_units() {
        let values = vec![("Gain".to_string(), ExtraValue::Number(2.0))];
        let err = flight_a().with_extras(values.clone(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ArchiveError::Value(_)));

        let units = BTreeMap::from([("Gain".to_string(), "percent".to_string())]);
        let dict = flight_a().with_extras(values, units).unwrap();
        let Some(ExtraValue::Number(gain)) = dict.extra("Gain") else {
            panic!("gain missing");
        };
        assert!((gain - 0.02).abs() < 1e-12);
    }

    #[test]
    fn text_extra_cannot_be_converted() {
        let values = vec![("Gain".to_string(), ExtraValue::Text("high".into()))];
        let units = BTreeMap::from([("Gain".to_string(), "percent".to_string())]);
        assert!(matches!(
            flight_a().with_extras(values, units),
            Err(ArchiveError::Type(_))
        ));
    }

    #[test]
    fn remove_window_and_metadata() {
        let mut dict = flight_a();
        let window = dict.window(t(900), t(2000)).unwrap();
        assert_eq!(window.index(), &[t(1000)]);

        let meta = dict.column_metadata().unwrap();
        assert_eq!(meta.units.get("Airspeed").map(String::as_str), Some("m/s"));
        let extras = dict.extras_metadata().unwrap();
        assert!(extras.descriptions.contains_key("SerialNumber"));

        assert!(dict.remove("SerialNumber"));
        assert!(dict.remove("Airspeed"));
        assert!(!dict.remove("Airspeed"));
        assert_eq!(dict.entry_count(), 0);

        let moved = dict.with_date_time(t(5000));
        assert_eq!(moved.date_time(), t(5000));
    }
}
