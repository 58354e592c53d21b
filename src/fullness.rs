//! Full (unselected) snapshot series for one station, consumed by external
//! plotting tools.

use serde::Serialize;

use crate::snapshot::{ProcessedSnapshot, StationId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FullnessError {
    /// A station absent from any snapshot in the range is a hard error, not
    /// a gap: the snapshot set and the request disagree about what exists.
    #[error("station {station_id} is not present at timestamp {timestamp}")]
    MissingStation {
        station_id: StationId,
        timestamp: i64,
    },
}

/// One station's state at one polled timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FullnessPoint {
    pub timestamp: i64,
    pub is_active: bool,
    pub bikes: i64,
    pub bikes_plus_docks: i64,
    pub capacity: i64,
    pub score: Option<i64>,
}

/// Extracts the full series for `station_id` across every snapshot, in
/// timestamp order.
///
/// # Errors
///
/// Fails on the first snapshot where the station is absent.
pub fn station_series(
    snapshots: &[(i64, ProcessedSnapshot)],
    station_id: &str,
) -> Result<Vec<FullnessPoint>, FullnessError> {
    snapshots
        .iter()
        .map(|(ts, snapshot)| {
            let record = snapshot
                .get(station_id)
                .ok_or_else(|| FullnessError::MissingStation {
                    station_id: station_id.to_string(),
                    timestamp: *ts,
                })?;
            Ok(FullnessPoint {
                timestamp: *ts,
                is_active: record.is_active,
                bikes: record.bikes,
                bikes_plus_docks: record.bikes + record.docks,
                capacity: record.capacity,
                score: record.score,
            })
        })
        .collect()
}
