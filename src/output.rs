//! Output formatting and persistence at the reporting boundary.
//!
//! Statistics flow through the pipeline at full precision; rounding to two
//! decimal digits happens here and nowhere else. Supports a JSON report on
//! stdout and CSV append.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::fullness::FullnessPoint;
use crate::snapshot::StationId;
use crate::trends::buckets::BucketStats;
use crate::trends::stats;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Rounds a value for display: two decimal digits, ties away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Full trend report for one run, emitted as JSON for the visualization
/// layer.
#[derive(Debug, Serialize)]
pub struct TrendReport {
    pub metric: String,
    pub mode: String,
    pub weekday_class: String,
    pub radius_miles: f64,
    pub min_diff: f64,
    pub hours: Vec<HourReport>,
}

/// Statistics and divergent pairs for one hour-of-day bucket.
#[derive(Debug, Serialize)]
pub struct HourReport {
    pub hour: u32,
    /// Sorted by (mean, stdev, station id).
    pub stations: Vec<StationRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<SpreadSummary>,
    pub diverging_pairs: Vec<(StationId, StationId)>,
}

#[derive(Debug, Serialize)]
pub struct StationRow {
    pub station_id: StationId,
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
}

/// How spread out per-station deviations are within one hour bucket.
#[derive(Debug, Serialize)]
pub struct SpreadSummary {
    pub mean_stdev: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdev_of_stdevs: Option<f64>,
}

impl HourReport {
    /// Builds one hour's rows from per-station bucket statistics, applying
    /// display rounding and a stable (mean, stdev, id) sort.
    pub fn build(
        hour: u32,
        station_stats: &BTreeMap<StationId, BucketStats>,
        diverging_pairs: Vec<(StationId, StationId)>,
    ) -> Self {
        let mut stations: Vec<StationRow> = station_stats
            .iter()
            .map(|(id, bucket)| StationRow {
                station_id: id.clone(),
                mean: round2(bucket.mean),
                stdev: round2(bucket.stdev),
                samples: bucket.samples,
            })
            .collect();
        stations.sort_by(|a, b| {
            a.mean
                .total_cmp(&b.mean)
                .then(a.stdev.total_cmp(&b.stdev))
                .then_with(|| a.station_id.cmp(&b.station_id))
        });

        let stdevs: Vec<f64> = station_stats.values().map(|b| b.stdev).collect();
        let spread = if stdevs.is_empty() {
            None
        } else {
            let mean_stdev = stats::mean(&stdevs);
            let stdev_of_stdevs =
                (stdevs.len() >= 2).then(|| round2(stats::sample_stdev(&stdevs, mean_stdev)));
            Some(SpreadSummary {
                mean_stdev: round2(mean_stdev),
                stdev_of_stdevs,
            })
        };

        HourReport {
            hour,
            stations,
            spread,
            diverging_pairs,
        }
    }
}

/// One flattened statistics row for CSV export.
#[derive(Debug, Serialize)]
pub struct TrendCsvRow {
    pub station_id: StationId,
    pub hour: u32,
    pub weekday_class: String,
    pub metric: String,
    pub mode: String,
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
}

/// Fullness export envelope for one station.
#[derive(Debug, Serialize)]
pub struct FullnessReport {
    pub station_id: StationId,
    pub name: String,
    pub series: Vec<FullnessPoint>,
}

/// Writes a report as pretty-printed JSON on stdout for downstream
/// consumers.
pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends any serializable record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &str, record: &T) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
