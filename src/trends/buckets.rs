//! Hour-of-day bucketed trend statistics for one station.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::settings::{AggregationMode, AnalysisConfig, MIN_BUCKET_SAMPLES};
use crate::trends::hourly::{HourlySample, is_one_hour_after};
use crate::trends::stats;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AggregateError {
    /// A requested bucket has too little history. The station is left out of
    /// the report rather than reported with an undefined deviation.
    #[error("hour bucket {hour} has {samples} samples, need at least {MIN_BUCKET_SAMPLES}")]
    InsufficientSamples { hour: u32, samples: usize },

    #[error("timestamp {0} is outside the representable datetime range")]
    TimestampOutOfRange(i64),
}

/// Mean and spread of one station's values in one hour-of-day bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStats {
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
}

/// Collects raw bucket values for one station.
///
/// Delta mode pairs adjacent samples and requires exact one-hour adjacency;
/// a qualifying pair lands in the earlier sample's bucket when that sample
/// matches the weekday class. Level mode takes each matching sample directly.
/// Records not carrying the metric contribute nothing.
pub fn bucket_values(
    series: &[HourlySample],
    config: &AnalysisConfig,
) -> Result<BTreeMap<u32, Vec<f64>>, AggregateError> {
    let mut buckets: BTreeMap<u32, Vec<f64>> = BTreeMap::new();

    match config.mode {
        AggregationMode::Delta => {
            for pair in series.windows(2) {
                let (first, second) = (&pair[0], &pair[1]);
                let first_dt = local(config, first.timestamp)?;
                let second_dt = local(config, second.timestamp)?;
                if !is_one_hour_after(second_dt, first_dt) {
                    // Missed hours and multi-day gaps are excluded, not
                    // approximated.
                    continue;
                }
                if !config.class.matches(first_dt.weekday()) {
                    continue;
                }
                let (Some(a), Some(b)) = (
                    config.metric.extract(&first.record),
                    config.metric.extract(&second.record),
                ) else {
                    continue;
                };
                buckets.entry(first_dt.hour()).or_default().push(b - a);
            }
        }
        AggregationMode::Level => {
            for sample in series {
                let dt = local(config, sample.timestamp)?;
                if !config.class.matches(dt.weekday()) {
                    continue;
                }
                let Some(value) = config.metric.extract(&sample.record) else {
                    continue;
                };
                buckets.entry(dt.hour()).or_default().push(value);
            }
        }
    }

    Ok(buckets)
}

/// Aggregates one station's series into per-bucket statistics for the
/// requested hours.
///
/// # Errors
///
/// Fails for the whole station as soon as any requested bucket holds fewer
/// than [`MIN_BUCKET_SAMPLES`] values.
pub fn aggregate_station(
    series: &[HourlySample],
    config: &AnalysisConfig,
) -> Result<BTreeMap<u32, BucketStats>, AggregateError> {
    let buckets = bucket_values(series, config)?;
    let empty = Vec::new();

    let mut out = BTreeMap::new();
    for hour in config.hours.hours() {
        let values = buckets.get(&hour).unwrap_or(&empty);
        if values.len() < MIN_BUCKET_SAMPLES {
            return Err(AggregateError::InsufficientSamples {
                hour,
                samples: values.len(),
            });
        }
        let mean = stats::mean(values);
        let stdev = stats::sample_stdev(values, mean);
        out.insert(
            hour,
            BucketStats {
                mean,
                stdev,
                samples: values.len(),
            },
        );
    }

    Ok(out)
}

fn local(config: &AnalysisConfig, timestamp: i64) -> Result<NaiveDateTime, AggregateError> {
    config
        .clock
        .datetime(timestamp)
        .ok_or(AggregateError::TimestampOutOfRange(timestamp))
}
