//! Hourly snapshot selection.
//!
//! The feed is polled at an irregular cadence, so several snapshots may land
//! within one calendar hour. Trend analysis wants exactly one sample per
//! hour: the earliest. Selection happens on whole snapshots, so every station
//! sees the same timestamps.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::settings::LocalClock;
use crate::snapshot::{CompactStationRecord, ProcessedSnapshot, StationId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("timestamp {0} is outside the representable datetime range")]
    TimestampOutOfRange(i64),
}

/// One hourly-selected sample for one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlySample {
    pub timestamp: i64,
    pub record: CompactStationRecord,
}

/// Keeps the earliest snapshot per local calendar hour.
///
/// Input order is not trusted: snapshots are sorted by timestamp first,
/// otherwise "earliest per hour" would depend on enumeration order.
pub fn select_hourly(
    mut snapshots: Vec<(i64, ProcessedSnapshot)>,
    clock: &LocalClock,
) -> Result<Vec<(i64, ProcessedSnapshot)>, SelectError> {
    snapshots.sort_by_key(|(ts, _)| *ts);

    let mut selected: Vec<(i64, ProcessedSnapshot)> = Vec::new();
    let mut previous_hour: Option<(NaiveDate, u32)> = None;

    for (ts, snapshot) in snapshots {
        let dt = clock
            .datetime(ts)
            .ok_or(SelectError::TimestampOutOfRange(ts))?;
        let hour_key = (dt.date(), dt.hour());
        if previous_hour == Some(hour_key) {
            continue;
        }
        previous_hour = Some(hour_key);
        selected.push((ts, snapshot));
    }

    Ok(selected)
}

/// Pivots hourly-selected snapshots into per-station series. Within each
/// series timestamps are strictly increasing; a station absent from a
/// selected snapshot simply has a gap.
pub fn per_station_series(
    selected: &[(i64, ProcessedSnapshot)],
) -> BTreeMap<StationId, Vec<HourlySample>> {
    let mut series: BTreeMap<StationId, Vec<HourlySample>> = BTreeMap::new();
    for (ts, snapshot) in selected {
        for (station_id, record) in snapshot {
            series.entry(station_id.clone()).or_default().push(HourlySample {
                timestamp: *ts,
                record: *record,
            });
        }
    }
    series
}

/// Is `second` exactly one calendar hour after `first`?
///
/// True when both fall on the same date with consecutive hours, or when
/// `first` is in the 23:00 hour and `second` in the 0:00 hour of the next
/// calendar day. Everything else, including the same hour, a missed hour,
/// and multi-day gaps, is non-adjacent.
pub fn is_one_hour_after(second: NaiveDateTime, first: NaiveDateTime) -> bool {
    if first.date() == second.date() {
        return second.hour() as i64 - first.hour() as i64 == 1;
    }
    first.date().succ_opt() == Some(second.date()) && first.hour() == 23 && second.hour() == 0
}
