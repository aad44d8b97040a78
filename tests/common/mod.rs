//! Shared fixtures for archive integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use flight_archive::archive::ArchiveSettings;
use flight_archive::{
    BackendKind, CampaignArchive, ColumnDict, FlagDefinition, FlagRegistry, GroupCollection,
    GroupNameFormat, OpenMode, RawRecord, UnitSpec,
};
use ndarray::array;

pub fn registry() -> Arc<FlagRegistry> {
    Arc::new(
        FlagRegistry::with_flags(vec![
            FlagDefinition::new("Airspeed", "m/s", "True airspeed"),
            FlagDefinition::new("Pitch", "deg", "Pitch angle"),
            FlagDefinition::new("Pressure", "Pa", "Static pressure"),
            FlagDefinition::new("Temperature", "K", "Static air temperature"),
            FlagDefinition::new("Counts_#", "counts", "Counts in bin #"),
            FlagDefinition::new("Spectrum", "counts", "Binned counts").multichannel(),
            FlagDefinition::new("SerialNumber", "dimensionless", "Instrument serial number"),
            FlagDefinition::new("BinBoundaries", "um", "Size bin boundaries"),
            FlagDefinition::new("Gain", "dimensionless", "Detector gain"),
        ])
        .unwrap(),
    )
}

/// 2022-06-01 09:00:00 UTC plus `ms` milliseconds.
pub fn t(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 6, 1, 9, 0, 0).unwrap() + Duration::milliseconds(ms)
}

pub fn settings(backend: BackendKind, timestep: Option<Duration>) -> ArchiveSettings {
    ArchiveSettings {
        timestep,
        backend,
        ..ArchiveSettings::default()
    }
}

/// Instrument A: airspeed at 1 Hz plus a serial number.
pub fn instrument_a(start_ms: i64) -> ColumnDict {
    let record = RawRecord::with_time(
        t(start_ms),
        vec![t(start_ms), t(start_ms + 1000), t(start_ms + 2000)],
    )
    .with("Airspeed", array![10.0, 11.0, 12.0])
    .with("SerialNumber", 1234.0);
    ColumnDict::from_canonical(record, registry()).unwrap()
}

/// Instrument B: pressure in hPa, offset by half a second.
pub fn instrument_b(start_ms: i64) -> ColumnDict {
    let record = RawRecord::with_time(
        t(start_ms),
        vec![t(start_ms + 500), t(start_ms + 1500)],
    )
    .with("Pressure", array![1013.25, 1000.0])
    .with("Gain", 2.5);
    ColumnDict::from_raw(
        record,
        UnitSpec::explicit([("Pressure", "hPa")]),
        registry(),
    )
    .unwrap()
}

/// A spectrometer instance with a multichannel column and mixed extras.
pub fn spectrometer(start_ms: i64) -> ColumnDict {
    let record = RawRecord::with_time(
        t(start_ms),
        vec![t(start_ms), t(start_ms + 1000)],
    )
    .with("Spectrum", array![[1.0, 2.0, 3.0], [4.0, f64::NAN, 6.0]])
    .with("Counts_2", array![7.0, 8.0])
    .with("BinBoundaries", vec![0.3, 0.5, 1.0, 2.5])
    .with("SerialNumber", "OPC-N3");
    ColumnDict::from_canonical(record, registry()).unwrap()
}

pub fn collection(instances: Vec<ColumnDict>) -> GroupCollection {
    GroupCollection::new(instances, GroupNameFormat::default()).unwrap()
}

pub fn create(path: &Path, backend: BackendKind) -> CampaignArchive {
    CampaignArchive::open(path, OpenMode::Create, settings(backend, None), registry()).unwrap()
}
