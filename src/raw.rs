//! Raw ingest input: the named values handed to a column dictionary, and the
//! per-ingest unit specification describing what unit each value arrived in.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::column::TypedColumn;

/// Key holding the acquisition start timestamp.
pub const DATE_TIME_KEY: &str = "date_time";
/// Key holding the row index.
pub const TIME_KEY: &str = "Time";

/// One raw value, classified by kind.
#[derive(Debug, Clone)]
pub enum RawValue {
    /// A single timestamp (only meaningful under `date_time`).
    Timestamp(DateTime<Utc>),
    /// An ordered timestamp sequence (only meaningful under `Time`).
    TimeIndex(Vec<DateTime<Utc>>),
    /// A time-series column, rows along axis 0.
    Column(Array2<f64>),
    /// An already validated column, stored as is.
    Typed(TypedColumn),
    /// Scalar metadata.
    Number(f64),
    /// Non time-series numeric list (coefficients, bin boundaries).
    Sequence(Vec<f64>),
    /// Text metadata.
    Text(String),
}

impl RawValue {
    /// Short name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Timestamp(_) => "timestamp",
            RawValue::TimeIndex(_) => "timestamp sequence",
            RawValue::Column(_) => "column",
            RawValue::Typed(_) => "typed column",
            RawValue::Number(_) => "number",
            RawValue::Sequence(_) => "sequence",
            RawValue::Text(_) => "text",
        }
    }
}

impl From<Array2<f64>> for RawValue {
    fn from(values: Array2<f64>) -> Self {
        RawValue::Column(values)
    }
}

impl From<Array1<f64>> for RawValue {
    fn from(values: Array1<f64>) -> Self {
        RawValue::Column(values.insert_axis(Axis(1)))
    }
}

impl From<TypedColumn> for RawValue {
    fn from(column: TypedColumn) -> Self {
        RawValue::Typed(column)
    }
}

impl From<Vec<f64>> for RawValue {
    fn from(values: Vec<f64>) -> Self {
        RawValue::Sequence(values)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<DateTime<Utc>> for RawValue {
    fn from(value: DateTime<Utc>) -> Self {
        RawValue::Timestamp(value)
    }
}

impl From<Vec<DateTime<Utc>>> for RawValue {
    fn from(value: Vec<DateTime<Utc>>) -> Self {
        RawValue::TimeIndex(value)
    }
}

impl From<ExtraValue> for RawValue {
    fn from(value: ExtraValue) -> Self {
        match value {
            ExtraValue::Number(v) => RawValue::Number(v),
            ExtraValue::Sequence(v) => RawValue::Sequence(v),
            ExtraValue::Text(v) => RawValue::Text(v),
        }
    }
}

/// Ordered raw mapping of tag to value.
///
/// Insertion order is kept because it becomes the column order of the
/// tabular projection.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    entries: Vec<(String, RawValue)>,
}

impl RawRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record seeded with the two mandatory keys.
    pub fn with_time(date_time: DateTime<Utc>, time: Vec<DateTime<Utc>>) -> Self {
        Self::new()
            .with(DATE_TIME_KEY, date_time)
            .with(TIME_KEY, time)
    }

    /// Builder-style insert.
    pub fn with(mut self, tag: &str, value: impl Into<RawValue>) -> Self {
        self.insert(tag, value);
        self
    }

    /// Inserts or replaces a value, keeping the original position on replace.
    pub fn insert(&mut self, tag: &str, value: impl Into<RawValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == tag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((tag.to_string(), value)),
        }
    }

    /// Removes and returns a value.
    pub fn take(&mut self, tag: &str) -> Option<RawValue> {
        let pos = self.entries.iter().position(|(k, _)| k == tag)?;
        Some(self.entries.remove(pos).1)
    }

    /// Looks a value up.
    pub fn get(&self, tag: &str) -> Option<&RawValue> {
        self.entries.iter().find(|(k, _)| k == tag).map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for RawRecord {
    type Item = (String, RawValue);
    type IntoIter = std::vec::IntoIter<(String, RawValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A non time-series value held in the extras area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    /// Scalar.
    Number(f64),
    /// Numeric list.
    Sequence(Vec<f64>),
    /// Text.
    Text(String),
}

impl ExtraValue {
    /// Collapses single-element sequences to scalars.
    pub fn normalized(self) -> Self {
        match self {
            ExtraValue::Sequence(v) if v.len() == 1 => ExtraValue::Number(v[0]),
            other => other,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Number(v) => write!(f, "{v}"),
            ExtraValue::Sequence(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            ExtraValue::Text(s) => f.write_str(s),
        }
    }
}

/// What unit each raw value arrived in.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UnitSpec {
    /// Every value is already in its canonical unit.
    #[default]
    Default,
    /// Tag to source unit.
    Explicit(BTreeMap<String, String>),
}

impl UnitSpec {
    /// Explicit spec from `(tag, unit)` pairs.
    pub fn explicit<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        UnitSpec::Explicit(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Parses the literal `"default"`.
    pub fn from_literal(literal: &str) -> Option<Self> {
        (literal == "default").then_some(UnitSpec::Default)
    }

    /// True for the `"default"` spec.
    pub fn is_default(&self) -> bool {
        matches!(self, UnitSpec::Default)
    }

    /// Source unit recorded for a tag.
    pub fn unit_for(&self, tag: &str) -> Option<&str> {
        match self {
            UnitSpec::Default => None,
            UnitSpec::Explicit(map) => map.get(tag).map(String::as_str),
        }
    }

    /// Tags named by an explicit spec.
    pub fn tags(&self) -> Vec<&str> {
        match self {
            UnitSpec::Default => Vec::new(),
            UnitSpec::Explicit(map) => map.keys().map(String::as_str).collect(),
        }
    }

    /// Union of two specs; entries of `other` win. `Default` only survives
    /// when both sides are `Default`.
    pub fn merged(&self, other: &UnitSpec) -> UnitSpec {
        match (self, other) {
            (UnitSpec::Default, UnitSpec::Default) => UnitSpec::Default,
            (UnitSpec::Explicit(a), UnitSpec::Default) => UnitSpec::Explicit(a.clone()),
            (UnitSpec::Default, UnitSpec::Explicit(b)) => UnitSpec::Explicit(b.clone()),
            (UnitSpec::Explicit(a), UnitSpec::Explicit(b)) => {
                let mut map = a.clone();
                map.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                UnitSpec::Explicit(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_keeps_insertion_order() {
        let t0 = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        let record = RawRecord::with_time(t0, vec![t0])
            .with("Pitch", vec![1.0])
            .with("Airspeed", 3.0);
        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["date_time", "Time", "Pitch", "Airspeed"]);
    }

    #[test]
    fn replace_keeps_position() {
        let mut record = RawRecord::new().with("A", 1.0).with("B", 2.0);
        record.insert("A", "x");
        assert!(matches!(record.iter().next(), Some(("A", RawValue::Text(_)))));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn single_element_sequence_becomes_scalar() {
        assert_eq!(ExtraValue::Sequence(vec![4.0]).normalized(), ExtraValue::Number(4.0));
        assert_eq!(
            ExtraValue::Sequence(vec![1.0, 2.0]).normalized(),
            ExtraValue::Sequence(vec![1.0, 2.0])
        );
    }

    #[test]
    fn extra_values_deserialize_untagged() {
        let parsed: Vec<ExtraValue> = serde_json::from_str(r#"[1.5, [1, 2], "abc"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                ExtraValue::Number(1.5),
                ExtraValue::Sequence(vec![1.0, 2.0]),
                ExtraValue::Text("abc".into())
            ]
        );
    }

    #[test]
    fn unit_spec_merge_prefers_second() {
        let a = UnitSpec::explicit([("Pressure", "hPa")]);
        let b = UnitSpec::explicit([("Pressure", "Pa"), ("Pitch", "rad")]);
        let merged = a.merged(&b);
        assert_eq!(merged.unit_for("Pressure"), Some("Pa"));
        assert_eq!(merged.unit_for("Pitch"), Some("rad"));
        assert!(UnitSpec::Default.merged(&UnitSpec::Default).is_default());
        assert_eq!(UnitSpec::from_literal("default"), Some(UnitSpec::Default));
        assert_eq!(UnitSpec::from_literal("canonical"), None);
    }
}
