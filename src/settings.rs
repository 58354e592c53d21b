//! Analysis configuration, threaded explicitly through the pipeline stages.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Weekday};
use clap::ValueEnum;

use crate::snapshot::CompactStationRecord;

/// Default search radius for nearby station pairs, in miles.
pub const DEFAULT_RADIUS_MILES: f64 = 0.5;

/// Buckets below this many samples have no meaningful deviation and fail
/// aggregation.
pub const MIN_BUCKET_SAMPLES: usize = 2;

/// Default UTC offset of the feed's home market (US Eastern standard time).
pub const DEFAULT_TZ_OFFSET_HOURS: i32 = -5;

/// Which per-record value the aggregation runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricKind {
    /// Number of bikes available.
    Bikes,
    /// Signed rebalancing score.
    Points,
}

impl MetricKind {
    /// Reads the metric from one record. Records that do not carry it, that
    /// is inactive stations or score-less records under `Points`, yield no
    /// sample.
    pub fn extract(self, record: &CompactStationRecord) -> Option<f64> {
        if !record.is_active {
            return None;
        }
        match self {
            MetricKind::Bikes => Some(record.bikes as f64),
            MetricKind::Points => record.score.map(|s| s as f64),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Bikes => "bikes",
            MetricKind::Points => "points",
        })
    }
}

/// How samples fold into hour-of-day buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AggregationMode {
    /// Hour-over-hour change between adjacent samples, bucketed by the
    /// earlier sample's hour.
    Delta,
    /// Sample values taken directly, no adjacency requirement.
    Level,
}

impl AggregationMode {
    /// Default divergence threshold for nearby-pair comparison.
    pub fn default_min_diff(self) -> f64 {
        match self {
            AggregationMode::Delta => 2.5,
            AggregationMode::Level => 1.5,
        }
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregationMode::Delta => "delta",
            AggregationMode::Level => "level",
        })
    }
}

/// Weekday/weekend partition of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WeekdayClass {
    Weekday,
    Weekend,
}

impl WeekdayClass {
    pub fn from_weekend_flag(weekend: bool) -> Self {
        if weekend {
            WeekdayClass::Weekend
        } else {
            WeekdayClass::Weekday
        }
    }

    pub fn matches(self, weekday: Weekday) -> bool {
        let is_weekend = weekday.num_days_from_monday() >= 5;
        match self {
            WeekdayClass::Weekday => !is_weekend,
            WeekdayClass::Weekend => is_weekend,
        }
    }
}

impl fmt::Display for WeekdayClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WeekdayClass::Weekday => "weekday",
            WeekdayClass::Weekend => "weekend",
        })
    }
}

/// Hour-of-day buckets a run computes and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourSelection {
    Single(u32),
    All,
}

impl HourSelection {
    pub fn hours(self) -> Vec<u32> {
        match self {
            HourSelection::Single(hour) => vec![hour],
            HourSelection::All => (0..24).collect(),
        }
    }
}

/// Converts epoch timestamps into the feed's local civil time.
///
/// The offset is explicit configuration rather than the process environment's
/// timezone, so a run produces the same buckets on any host.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn from_offset_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(|offset| Self { offset })
    }

    /// Clock at UTC, for tests and offset-free data sets.
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }

    /// Local civil datetime for an epoch timestamp, `None` when the
    /// timestamp is outside the representable range.
    pub fn datetime(&self, timestamp: i64) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(timestamp, 0)
            .map(|utc| utc.with_timezone(&self.offset).naive_local())
    }
}

/// Everything the trend stages need to know, assembled once from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisConfig {
    pub metric: MetricKind,
    pub mode: AggregationMode,
    pub class: WeekdayClass,
    pub hours: HourSelection,
    pub clock: LocalClock,
    pub radius_miles: f64,
    pub min_diff: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::Bikes,
            mode: AggregationMode::Delta,
            class: WeekdayClass::Weekday,
            hours: HourSelection::All,
            clock: LocalClock::utc(),
            radius_miles: DEFAULT_RADIUS_MILES,
            min_diff: AggregationMode::Delta.default_min_diff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_active: bool, bikes: i64, score: Option<i64>) -> CompactStationRecord {
        CompactStationRecord {
            is_active,
            bikes,
            docks: 5,
            capacity: 20,
            score,
        }
    }

    #[test]
    fn test_extract_bikes() {
        assert_eq!(MetricKind::Bikes.extract(&record(true, 12, None)), Some(12.0));
        assert_eq!(MetricKind::Bikes.extract(&record(false, 12, None)), None);
    }

    #[test]
    fn test_extract_points_requires_score() {
        assert_eq!(
            MetricKind::Points.extract(&record(true, 12, Some(-4))),
            Some(-4.0)
        );
        assert_eq!(MetricKind::Points.extract(&record(true, 12, None)), None);
        assert_eq!(MetricKind::Points.extract(&record(false, 12, Some(3))), None);
    }

    #[test]
    fn test_weekday_class_partition() {
        assert!(WeekdayClass::Weekday.matches(Weekday::Mon));
        assert!(WeekdayClass::Weekday.matches(Weekday::Fri));
        assert!(!WeekdayClass::Weekday.matches(Weekday::Sat));
        assert!(WeekdayClass::Weekend.matches(Weekday::Sat));
        assert!(WeekdayClass::Weekend.matches(Weekday::Sun));
        assert!(!WeekdayClass::Weekend.matches(Weekday::Wed));
    }

    #[test]
    fn test_hour_selection() {
        assert_eq!(HourSelection::Single(17).hours(), vec![17]);
        let all = HourSelection::All.hours();
        assert_eq!(all.len(), 24);
        assert_eq!(all[0], 0);
        assert_eq!(all[23], 23);
    }

    #[test]
    fn test_local_clock_applies_offset() {
        use chrono::Timelike;

        let utc = LocalClock::utc();
        let eastern = LocalClock::from_offset_hours(-5).unwrap();

        // 1970-01-01T00:00:00Z.
        let dt_utc = utc.datetime(0).unwrap();
        assert_eq!(dt_utc.hour(), 0);

        let dt_eastern = eastern.datetime(0).unwrap();
        assert_eq!(dt_eastern.hour(), 19);
        assert_eq!(dt_eastern.date().to_string(), "1969-12-31");
    }

    #[test]
    fn test_invalid_offset_is_rejected() {
        assert!(LocalClock::from_offset_hours(-5).is_some());
        assert!(LocalClock::from_offset_hours(24).is_none());
    }

    #[test]
    fn test_default_min_diff_by_mode() {
        assert!(
            AggregationMode::Delta.default_min_diff() > AggregationMode::Level.default_min_diff()
        );
        assert_eq!(AggregationMode::Delta.default_min_diff(), 2.5);
        assert_eq!(AggregationMode::Level.default_min_diff(), 1.5);
    }

    #[test]
    fn test_display_names_match_cli_values() {
        assert_eq!(MetricKind::Bikes.to_string(), "bikes");
        assert_eq!(MetricKind::Points.to_string(), "points");
        assert_eq!(AggregationMode::Delta.to_string(), "delta");
        assert_eq!(AggregationMode::Level.to_string(), "level");
        assert_eq!(WeekdayClass::Weekend.to_string(), "weekend");
    }
}
