//! Ingest path: configuration, registry validation, unit conversion and
//! grouping, without touching storage.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use common::{collection, instrument_a, instrument_b, t};
use flight_archive::config::ArchiveConfig;
use flight_archive::{
    ArchiveError, ColumnDict, ExtraValue, FlagRegistry, GroupNameFormat, RawRecord, UnitSpec,
};
use ndarray::array;

fn shipped_config() -> ArchiveConfig {
    let config =
        ArchiveConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/flight_archive.toml"))
            .unwrap();
    config.validate().unwrap();
    config
}

fn shipped_registry() -> Arc<FlagRegistry> {
    Arc::new(shipped_config().flag_registry().unwrap())
}

#[test]
fn test_shipped_configuration_is_valid() {
    let config = shipped_config();
    let settings = config.archive_settings().unwrap();
    assert_eq!(settings.group_format.pattern(), "%Y%m%d_%H%M%S");
    assert_eq!(settings.timestep, Some(Duration::seconds(1)));

    let registry = config.flag_registry().unwrap();
    assert_eq!(registry.canonical_unit("Counts_12").unwrap(), "counts");
    assert!(registry.is_multichannel("Spectrum").unwrap());
}

#[test]
fn test_configured_units_convert_on_ingest() {
    let record = RawRecord::with_time(t(0), vec![t(0), t(1000)])
        .with("Airspeed", array![100.0, 200.0])
        .with("Altitude", array![10.0, 20.0])
        .with("Temperature", array![0.0, 25.0]);
    let dict = ColumnDict::from_raw(
        record,
        UnitSpec::explicit([("Airspeed", "kts"), ("Altitude", "hft"), ("Temperature", "degC")]),
        shipped_registry(),
    )
    .unwrap();

    let airspeed = dict.column("Airspeed").unwrap().values();
    assert!((airspeed[[0, 0]] - 51.444_444_444).abs() < 1e-6);
    let altitude = dict.column("Altitude").unwrap().values();
    assert!((altitude[[1, 0]] - 609.6).abs() < 1e-9);
    let temperature = dict.column("Temperature").unwrap().values();
    assert!((temperature[[0, 0]] - 273.15).abs() < 1e-9);
    assert!((temperature[[1, 0]] - 298.15).abs() < 1e-9);
}

#[test]
fn test_hectopascals_become_pascals() {
    let pressure = instrument_b(0);
    let values = pressure.column("Pressure").unwrap().values();
    assert_eq!(values[[0, 0]], 101_325.0);
    assert_eq!(values[[1, 0]], 100_000.0);
    assert_eq!(pressure.column("Pressure").unwrap().unit(), Some("Pa"));
}

#[test]
fn test_instruments_merge_into_one_group() {
    let merged = instrument_a(0).combine(&instrument_b(0)).unwrap();
    assert_eq!(merged.time(), &[t(0), t(500), t(1000), t(1500), t(2000)]);
    assert_eq!(merged.columns().len(), 2);
    assert_eq!(merged.extras().len(), 2);
    assert!(merged.unit_spec().is_default());

    let table = merged.to_table(Some(Duration::seconds(1))).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.column_names(), vec!["Airspeed", "Pressure"]);

    let groups = collection(vec![merged]);
    assert_eq!(groups.group_names(), &["20220601_090000".to_string()]);
    let metadata = groups.metadata_by_group().unwrap();
    assert_eq!(metadata["20220601_090000"].units["Pressure"], "Pa");
    assert_eq!(
        metadata["20220601_090000"].descriptions["Airspeed"],
        "True airspeed"
    );
}

#[test]
fn test_collections_combine_under_one_format() {
    let first = collection(vec![instrument_a(0)]);
    let second = collection(vec![instrument_a(3_600_000)]);
    let both = first.combine(&second).unwrap();
    assert_eq!(
        both.group_names(),
        &["20220601_090000".to_string(), "20220601_100000".to_string()]
    );
    assert!(both.get("20220601_100000").is_some());
    assert_eq!(both.to_tables(None).unwrap().len(), 2);
}

#[test]
fn test_group_names_round_trip_the_format() {
    let format = GroupNameFormat::default();
    assert_eq!(format.format(&t(0)).unwrap(), "20220601_090000");
    assert_eq!(format.validate("20220601_090000").unwrap(), t(0));
    assert!(matches!(
        format.validate("2022-06-01"),
        Err(ArchiveError::InvalidGroupName(_))
    ));
    assert!(GroupNameFormat::new("%Y%m%d").is_err());
}

#[test]
fn test_unknown_tags_are_rejected() {
    let record = RawRecord::with_time(t(0), vec![t(0)]).with("WindShear", array![1.0]);
    assert!(matches!(
        ColumnDict::from_canonical(record, shipped_registry()),
        Err(ArchiveError::Lookup(_))
    ));
}

#[test]
fn test_extras_need_units() {
    let dict = instrument_a(0);
    let values = vec![("Gain".to_string(), ExtraValue::Number(4.0))];
    assert!(matches!(
        dict.clone().with_extras(values.clone(), BTreeMap::new()),
        Err(ArchiveError::Value(_))
    ));

    let units = BTreeMap::from([("Gain".to_string(), "percent".to_string())]);
    let dict = dict.with_extras(values, units).unwrap();
    match dict.extra("Gain") {
        Some(ExtraValue::Number(gain)) => assert!((gain - 0.04).abs() < 1e-12),
        other => panic!("unexpected gain {other:?}"),
    }
    assert_eq!(dict.unit_spec().unit_for("Gain"), Some("percent"));
}
