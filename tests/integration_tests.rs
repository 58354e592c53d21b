//! End-to-end pipeline tests over fixture snapshots.
//!
//! The fixtures cover two Mondays (2021-02-01 and 2021-02-08, UTC) of polling
//! for two downtown stations, including a same-hour duplicate poll, an
//! upstream error sentinel, a placeholder-name upgrade, a rejected rename,
//! and a sub-jitter coordinate nudge.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use bikeshare_trends::feed::{self, RawSnapshot};
use bikeshare_trends::registry::{ReconcilePolicy, StationRegistry};
use bikeshare_trends::settings::{AnalysisConfig, HourSelection};
use bikeshare_trends::snapshot;
use bikeshare_trends::store;
use bikeshare_trends::trends::buckets;
use bikeshare_trends::trends::hourly;
use bikeshare_trends::trends::pairs::{self, NearbyPairs};

const FIXTURES: [(&str, &str); 6] = [
    ("1612173600.json", include_str!("fixtures/1612173600.json")), // Mon 02-01 10:00
    ("1612174500.json", include_str!("fixtures/1612174500.json")), // Mon 02-01 10:15
    ("1612176300.json", include_str!("fixtures/1612176300.json")), // error sentinel
    ("1612177200.json", include_str!("fixtures/1612177200.json")), // Mon 02-01 11:00
    ("1612778400.json", include_str!("fixtures/1612778400.json")), // Mon 02-08 10:00
    ("1612782000.json", include_str!("fixtures/1612782000.json")), // Mon 02-08 11:00
];

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bikeshare_e2e_{tag}_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_sentinel_fixture_parses_as_error() {
    let raw = feed::parse_snapshot(include_str!("fixtures/1612176300.json").as_bytes()).unwrap();
    assert!(matches!(raw, RawSnapshot::Sentinel { .. }));
}

#[test]
fn test_full_pipeline() {
    let raw_dir = temp_dir("raw");
    let processed_dir = temp_dir("processed");
    let cache_path = std::env::temp_dir().join(format!(
        "bikeshare_e2e_pairs_{}.json",
        std::process::id()
    ));
    for (name, body) in FIXTURES {
        fs::write(raw_dir.join(name), body).unwrap();
    }

    // Process stage: normalize every raw snapshot in timestamp order,
    // feeding the registry and writing one processed file per timestamp.
    let files = store::list_snapshot_files(&raw_dir).unwrap();
    assert_eq!(files.len(), 6);

    let mut registry = StationRegistry::new(ReconcilePolicy::default());
    for (ts, path) in files {
        let features = match store::load_raw_snapshot(&path).unwrap() {
            RawSnapshot::Sentinel { .. } => continue,
            RawSnapshot::Stations { features } => features,
        };
        let normalized = snapshot::normalize_snapshot(&features);
        assert!(normalized.errors.is_empty(), "{:?}", normalized.errors);
        for station in &normalized.stations {
            registry.update(&station.id, &station.name, station.coords, ts);
        }
        store::write_processed_snapshot(&processed_dir, ts, &normalized.to_processed()).unwrap();
    }

    // Identity reconciliation: "N1" upgrades to "Back Bay", the later
    // "Copley Sq" rename is rejected, and the 50 m coordinate nudge on
    // 02-08 is accepted as jitter.
    assert_eq!(registry.len(), 2);
    let entry = registry.get("3").unwrap();
    assert_eq!(entry.latest_name(), "Back Bay");
    assert_eq!(entry.name_history().entries().len(), 2);
    assert_eq!(entry.coords_history().entries().len(), 2);
    assert_eq!(entry.latest_coords(), (42.36055, -71.0589));
    assert_eq!(entry.first_seen(), 1612173600);

    // The sentinel produced no processed file.
    let snapshots = store::load_processed_snapshots(&processed_dir).unwrap();
    assert_eq!(snapshots.len(), 5);

    // Score sign convention survived persistence: "give" 4 is -4, "take" 2
    // is +2.
    assert_eq!(snapshots[0].1["3"].score, Some(-4));
    assert_eq!(snapshots[2].1["3"].score, Some(2));
    assert_eq!(snapshots[0].1["4"].score, None);

    // Hourly selection drops the 10:15 duplicate and keeps the earliest
    // sample per hour.
    let config = AnalysisConfig {
        hours: HourSelection::Single(10),
        ..AnalysisConfig::default()
    };
    let selected = hourly::select_hourly(snapshots, &config.clock).unwrap();
    let timestamps: Vec<i64> = selected.iter().map(|(ts, _)| *ts).collect();
    assert_eq!(
        timestamps,
        vec![1612173600, 1612177200, 1612778400, 1612782000]
    );
    assert_eq!(selected[0].1["3"].bikes, 12);

    // Delta aggregation for the 10:00 bucket: station 3 sees deltas -3 and
    // -5, station 4 sees +1 twice.
    let series = hourly::per_station_series(&selected);
    let stats3 = buckets::aggregate_station(&series["3"], &config).unwrap();
    assert_eq!(stats3[&10].samples, 2);
    assert_eq!(stats3[&10].mean, -4.0);
    assert!((stats3[&10].stdev - 2.0_f64.sqrt()).abs() < 1e-12);

    let stats4 = buckets::aggregate_station(&series["4"], &config).unwrap();
    assert_eq!(stats4[&10].mean, 1.0);
    assert_eq!(stats4[&10].stdev, 0.0);

    // The stations sit about 0.3 miles apart and their hour-10 means differ
    // by 5, well past the delta-mode threshold.
    let coords = registry.latest_coords();
    let nearby = NearbyPairs::load_or_compute(&cache_path, &coords, config.radius_miles).unwrap();
    assert!(nearby.contains("3", "4"));
    assert!(nearby.contains("4", "3"));

    let means = BTreeMap::from([
        ("3".to_string(), stats3[&10].mean),
        ("4".to_string(), stats4[&10].mean),
    ]);
    let diverging = pairs::diverging_pairs(&nearby, &means, config.min_diff);
    assert_eq!(diverging, vec![("3".to_string(), "4".to_string())]);

    // A second load hits the cache since nothing moved.
    let reloaded = NearbyPairs::load_or_compute(&cache_path, &coords, config.radius_miles).unwrap();
    assert_eq!(reloaded, nearby);

    fs::remove_dir_all(&raw_dir).ok();
    fs::remove_dir_all(&processed_dir).ok();
    fs::remove_file(&cache_path).ok();
}

#[test]
fn test_registry_roundtrip_through_file() {
    let raw_dir = temp_dir("reg_raw");
    for (name, body) in FIXTURES {
        fs::write(raw_dir.join(name), body).unwrap();
    }

    let mut registry = StationRegistry::new(ReconcilePolicy::default());
    for (ts, path) in store::list_snapshot_files(&raw_dir).unwrap() {
        let features = match store::load_raw_snapshot(&path).unwrap() {
            RawSnapshot::Sentinel { .. } => continue,
            RawSnapshot::Stations { features } => features,
        };
        for station in &snapshot::normalize_snapshot(&features).stations {
            registry.update(&station.id, &station.name, station.coords, ts);
        }
    }

    let path = std::env::temp_dir().join(format!(
        "bikeshare_e2e_registry_{}.json",
        std::process::id()
    ));
    registry.save(&path).unwrap();
    let loaded = StationRegistry::load(&path, ReconcilePolicy::default()).unwrap();

    assert_eq!(loaded.len(), 2);
    let entry = loaded.get("3").unwrap();
    assert_eq!(entry.latest_name(), "Back Bay");
    // The full change log survives persistence: the name as of the first
    // snapshot is still the placeholder.
    assert_eq!(
        entry.name_history().as_of(1612173600).map(String::as_str),
        Some("N1")
    );
    assert_eq!(loaded.get("4").unwrap().latest_name(), "Gov Center");

    fs::remove_dir_all(&raw_dir).ok();
    fs::remove_file(&path).ok();
}
