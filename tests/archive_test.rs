//! Campaign archive behaviour, run against every enabled backend.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use common::{collection, create, instrument_a, instrument_b, registry, settings, spectrometer, t};
use flight_archive::{
    ArchiveError, BackendKind, CampaignArchive, ColumnDict, ExtraValue, FlagDefinition,
    FlagRegistry, OpenMode, RawRecord, Validity,
};
use ndarray::array;
use tempfile::TempDir;

fn archive_path(dir: &TempDir, backend: BackendKind) -> PathBuf {
    match backend {
        BackendKind::Hdf5 => dir.path().join("campaign.h5"),
        BackendKind::Parquet => dir.path().join("campaign"),
    }
}

fn open(
    path: &Path,
    mode: OpenMode,
    backend: BackendKind,
) -> flight_archive::ArchiveResult<CampaignArchive> {
    CampaignArchive::open(path, mode, settings(backend, None), registry())
}

fn write_then_read_round_trips(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);

    let merged = instrument_a(0).combine(&instrument_b(0)).unwrap();
    let mut archive = create(&path, backend);
    let written = archive
        .write(&collection(vec![merged, spectrometer(60_000)]))
        .unwrap();
    assert_eq!(written, 2);
    archive.close().unwrap();

    let archive = open(&path, OpenMode::Read, backend).unwrap();
    assert_eq!(archive.validity(), &Validity::Valid);
    assert_eq!(
        archive.group_names().unwrap(),
        vec!["20220601_090000", "20220601_090100"]
    );

    let flight = archive.read_group("20220601_090000").unwrap();
    assert_eq!(flight.date_time(), t(0));
    assert_eq!(flight.time(), &[t(0), t(500), t(1000), t(1500), t(2000)]);
    let airspeed = flight.column("Airspeed").unwrap();
    assert_eq!(airspeed.unit(), Some("m/s"));
    assert_eq!(airspeed.values()[[0, 0]], 10.0);
    assert!(airspeed.values()[[1, 0]].is_nan());
    assert_eq!(airspeed.values()[[4, 0]], 12.0);
    let pressure = flight.column("Pressure").unwrap();
    assert_eq!(pressure.values()[[1, 0]], 101_325.0);
    assert_eq!(pressure.values()[[3, 0]], 100_000.0);
    assert_eq!(flight.extra("SerialNumber"), Some(&ExtraValue::Number(1234.0)));
    assert_eq!(flight.extra("Gain"), Some(&ExtraValue::Number(2.5)));

    let spectra = archive.read_group("20220601_090100").unwrap();
    let spectrum = spectra.column("Spectrum").unwrap();
    assert_eq!(spectrum.width(), 3);
    assert_eq!(spectrum.values()[[1, 2]], 6.0);
    assert!(spectrum.values()[[1, 1]].is_nan());
    assert_eq!(
        spectra.column("Counts_2").unwrap().values().column(0).to_vec(),
        vec![7.0, 8.0]
    );
    assert_eq!(
        spectra.extra("BinBoundaries"),
        Some(&ExtraValue::Sequence(vec![0.3, 0.5, 1.0, 2.5]))
    );
    assert_eq!(
        spectra.extra("SerialNumber"),
        Some(&ExtraValue::Text("OPC-N3".into()))
    );

    let all = archive.read().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.date_times(), &[t(0), t(60_000)]);
    assert_eq!(
        archive.read_first().unwrap().unwrap().date_time(),
        t(0)
    );
}

fn existing_groups_are_never_overwritten(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.write(&collection(vec![instrument_a(0)])).unwrap();

    let record = RawRecord::with_time(t(0), vec![t(0)]).with("Airspeed", array![99.0]);
    let replacement =
        ColumnDict::from_canonical(record, registry()).unwrap();
    let err = archive
        .write(&collection(vec![replacement.clone()]))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::GroupExists(ref g) if g == "20220601_090000"));
    archive.close().unwrap();

    let mut archive = open(&path, OpenMode::Append, backend).unwrap();
    assert!(matches!(
        archive.write(&collection(vec![replacement.clone()])),
        Err(ArchiveError::GroupExists(_))
    ));
    let kept = archive.read_group("20220601_090000").unwrap();
    assert_eq!(kept.len(), 3);
    assert_eq!(kept.column("Airspeed").unwrap().values()[[0, 0]], 10.0);
    archive.close().unwrap();

    let mut archive = CampaignArchive::open_with(
        &path,
        OpenMode::Append,
        settings(backend, None),
        registry(),
        true,
    )
    .unwrap();
    archive.write(&collection(vec![replacement])).unwrap();
    let replaced = archive.read_group("20220601_090000").unwrap();
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced.column("Airspeed").unwrap().values()[[0, 0]], 99.0);
}

fn non_finite_extras_round_trip(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let record = RawRecord::with_time(t(0), vec![t(0), t(1000)])
        .with("Airspeed", array![10.0, 11.0])
        .with("Gain", f64::NAN)
        .with("BinBoundaries", vec![0.3, f64::NAN, 1.0, f64::INFINITY])
        .with("SerialNumber", "NaN");
    let flight = ColumnDict::from_canonical(record, registry()).unwrap();
    let mut archive = create(&path, backend);
    archive.write(&collection(vec![flight])).unwrap();
    archive.close().unwrap();

    let archive = open(&path, OpenMode::Read, backend).unwrap();
    let back = archive.read_group("20220601_090000").unwrap();
    match back.extra("Gain") {
        Some(ExtraValue::Number(gain)) => assert!(gain.is_nan()),
        other => panic!("expected a NaN gain, got {other:?}"),
    }
    match back.extra("BinBoundaries") {
        Some(ExtraValue::Sequence(bounds)) => {
            assert_eq!(bounds.len(), 4);
            assert_eq!(bounds[0], 0.3);
            assert!(bounds[1].is_nan());
            assert_eq!(bounds[2], 1.0);
            assert_eq!(bounds[3], f64::INFINITY);
        }
        other => panic!("expected bin boundaries, got {other:?}"),
    }
    assert_eq!(back.extra("SerialNumber"), Some(&ExtraValue::Text("NaN".into())));
}

fn duplicate_names_write_nothing(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    let err = archive
        .write(&collection(vec![spectrometer(60_000), instrument_a(0), instrument_a(0)]))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::GroupExists(_)));
    assert!(archive.group_names().unwrap().is_empty());
}

fn read_only_open_reports_validity(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let missing = archive_path(&dir, backend);

    let archive = open(&missing, OpenMode::Read, backend).unwrap();
    assert_eq!(archive.validity(), &Validity::Missing);
    assert!(!archive.is_valid());
    assert!(matches!(
        archive.group_names(),
        Err(ArchiveError::ArchiveNotFound(_))
    ));
    assert!(matches!(
        open(&missing, OpenMode::ReadWrite, backend),
        Err(ArchiveError::ArchiveNotFound(_))
    ));

    fs::write(&missing, b"not an archive").unwrap();
    let archive = open(&missing, OpenMode::Read, backend).unwrap();
    assert!(matches!(archive.validity(), Validity::Malformed { .. }));
    assert!(matches!(
        archive.read(),
        Err(ArchiveError::InvalidArchive { .. })
    ));
    assert!(matches!(
        open(&missing, OpenMode::Append, backend),
        Err(ArchiveError::InvalidArchive { .. })
    ));
}

fn create_modes_refuse_existing_stores(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.write(&collection(vec![instrument_a(0)])).unwrap();
    archive.close().unwrap();

    assert!(matches!(
        open(&path, OpenMode::Create, backend),
        Err(ArchiveError::ArchiveExists(_))
    ));
    assert!(matches!(
        open(&path, OpenMode::CreateNew, backend),
        Err(ArchiveError::ArchiveExists(_))
    ));
    let untouched = open(&path, OpenMode::Read, backend).unwrap();
    assert_eq!(untouched.group_names().unwrap().len(), 1);
    drop(untouched);

    let truncated = CampaignArchive::open_with(
        &path,
        OpenMode::Create,
        settings(backend, None),
        registry(),
        true,
    )
    .unwrap();
    assert!(truncated.group_names().unwrap().is_empty());
}

fn read_only_archive_rejects_writes(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    create(&path, backend).close().unwrap();

    let mut archive = open(&path, OpenMode::Read, backend).unwrap();
    assert!(matches!(
        archive.write(&collection(vec![instrument_a(0)])),
        Err(ArchiveError::ReadOnly)
    ));
}

fn close_is_idempotent(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.close().unwrap();
    archive.close().unwrap();
    assert!(archive.is_closed());
    assert!(matches!(archive.group_names(), Err(ArchiveError::Closed)));
    assert!(matches!(
        archive.write(&collection(vec![instrument_a(0)])),
        Err(ArchiveError::Closed)
    ));
}

fn staged_collections_are_written_together(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.stage(collection(vec![instrument_a(0)])).unwrap();
    archive.stage(collection(vec![spectrometer(60_000)])).unwrap();
    assert_eq!(archive.staged().unwrap().len(), 2);

    assert_eq!(archive.write_staged().unwrap(), 2);
    assert!(archive.staged().is_none());
    assert_eq!(archive.write_staged().unwrap(), 0);
    assert_eq!(archive.group_names().unwrap().len(), 2);
}

fn write_resamples_onto_timestep(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = CampaignArchive::open(
        &path,
        OpenMode::Create,
        settings(backend, Some(Duration::seconds(1))),
        registry(),
    )
    .unwrap();
    let merged = instrument_a(0).combine(&instrument_b(0)).unwrap();
    archive.write(&collection(vec![merged])).unwrap();

    let flight = archive.read_group("20220601_090000").unwrap();
    assert_eq!(flight.time(), &[t(0), t(1000), t(2000)]);
    let airspeed = flight.column("Airspeed").unwrap().values();
    assert_eq!(airspeed.column(0).to_vec(), vec![10.0, 11.0, 12.0]);
    let pressure = flight.column("Pressure").unwrap().values();
    assert_eq!(pressure[[0, 0]], 101_325.0);
    assert_eq!(pressure[[1, 0]], 100_000.0);
    assert!(pressure[[2, 0]].is_nan());
}

fn lookups_fail_cleanly(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.write(&collection(vec![instrument_a(0)])).unwrap();
    assert!(matches!(
        archive.read_group("20220601_090001"),
        Err(ArchiveError::Lookup(_))
    ));
    assert!(matches!(
        archive.read_group("flight_one"),
        Err(ArchiveError::InvalidGroupName(_))
    ));
}

fn changed_canonical_units_convert_on_read(backend: BackendKind) {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, backend);
    let mut archive = create(&path, backend);
    archive.write(&collection(vec![instrument_b(0)])).unwrap();
    archive.close().unwrap();

    let hpa_registry = Arc::new(
        FlagRegistry::with_flags(vec![
            FlagDefinition::new("Pressure", "hPa", "Static pressure"),
            FlagDefinition::new("Gain", "dimensionless", "Detector gain"),
        ])
        .unwrap(),
    );
    let archive =
        CampaignArchive::open(&path, OpenMode::Read, settings(backend, None), hpa_registry)
            .unwrap();
    let flight = archive.read_group("20220601_090000").unwrap();
    let pressure = flight.column("Pressure").unwrap();
    assert_eq!(pressure.unit(), Some("hPa"));
    assert!((pressure.values()[[0, 0]] - 1013.25).abs() < 1e-9);
}

macro_rules! backend_tests {
    ($module:ident, $feature:literal, $backend:expr) => {
        #[cfg(feature = $feature)]
        mod $module {
            use super::*;

            #[test]
            fn test_write_then_read_round_trips() {
                write_then_read_round_trips($backend);
            }

            #[test]
            fn test_existing_groups_are_never_overwritten() {
                existing_groups_are_never_overwritten($backend);
            }

            #[test]
            fn test_duplicate_names_write_nothing() {
                duplicate_names_write_nothing($backend);
            }

            #[test]
            fn test_read_only_open_reports_validity() {
                read_only_open_reports_validity($backend);
            }

            #[test]
            fn test_create_modes_refuse_existing_stores() {
                create_modes_refuse_existing_stores($backend);
            }

            #[test]
            fn test_read_only_archive_rejects_writes() {
                read_only_archive_rejects_writes($backend);
            }

            #[test]
            fn test_non_finite_extras_round_trip() {
                non_finite_extras_round_trip($backend);
            }

            #[test]
            fn test_close_is_idempotent() {
                close_is_idempotent($backend);
            }

            #[test]
            fn test_staged_collections_are_written_together() {
                staged_collections_are_written_together($backend);
            }

            #[test]
            fn test_write_resamples_onto_timestep() {
                write_resamples_onto_timestep($backend);
            }

            #[test]
            fn test_lookups_fail_cleanly() {
                lookups_fail_cleanly($backend);
            }

            #[test]
            fn test_changed_canonical_units_convert_on_read() {
                changed_canonical_units_convert_on_read($backend);
            }
        }
    };
}

backend_tests!(parquet, "storage_parquet", BackendKind::Parquet);
backend_tests!(hdf5, "storage_hdf5", BackendKind::Hdf5);

#[cfg(feature = "storage_parquet")]
#[test]
fn test_foreign_entries_make_archive_malformed() {
    let dir = TempDir::new().unwrap();
    let path = archive_path(&dir, BackendKind::Parquet);
    create(&path, BackendKind::Parquet).close().unwrap();
    fs::create_dir(path.join("calibration")).unwrap();

    let archive = open(&path, OpenMode::Read, BackendKind::Parquet).unwrap();
    match archive.validity() {
        Validity::Malformed { reason } => assert!(reason.contains("calibration")),
        other => panic!("expected malformed archive, got {other}"),
    }
}
