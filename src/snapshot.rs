//! Snapshot normalization: each raw feed feature becomes one compact
//! per-station record plus the identity observation fed to the registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::feed::StationFeature;
use crate::geo::LatLon;

/// Opaque stable station key from the upstream feed.
pub type StationId = String;

/// All station records at one timestamp, keyed by station id.
pub type ProcessedSnapshot = BTreeMap<StationId, CompactStationRecord>;

/// Per-record normalization failure. Fatal for the record, not the run.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("bike angels action {action:?} not recognized for station {station_id}")]
    UnrecognizedAction { station_id: StationId, action: String },

    #[error("active station {station_id} is missing {field}")]
    MissingField {
        station_id: StationId,
        field: &'static str,
    },

    #[error("station {station_id} appears more than once in the snapshot")]
    DuplicateStation { station_id: StationId },
}

/// Flat per-station record, persisted as a positional JSON array:
/// `[is_active, bikes, docks, capacity]`, with the signed score appended as a
/// fifth element when the feed carried an imbalance signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStationRecord {
    pub is_active: bool,
    pub bikes: i64,
    pub docks: i64,
    pub capacity: i64,
    pub score: Option<i64>,
}

impl Serialize for CompactStationRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.score.is_some() { 5 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.is_active)?;
        seq.serialize_element(&self.bikes)?;
        seq.serialize_element(&self.docks)?;
        seq.serialize_element(&self.capacity)?;
        if let Some(score) = self.score {
            seq.serialize_element(&score)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CompactStationRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = CompactStationRecord;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a station record array of 4 or 5 elements")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let is_active = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let bikes = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let docks = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let capacity = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let score = seq.next_element()?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(6, &self));
                }

                Ok(CompactStationRecord {
                    is_active,
                    bikes,
                    docks,
                    capacity,
                    score,
                })
            }
        }

        deserializer.deserialize_seq(RecordVisitor)
    }
}

/// One station's normalized view of a single snapshot: the identity
/// observation for the registry plus the compact record kept for analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStation {
    pub id: StationId,
    pub name: String,
    /// Latitude first; the feed's axis order is reversed during
    /// normalization.
    pub coords: LatLon,
    pub record: CompactStationRecord,
}

/// Outcome of normalizing one full payload: the records that normalized
/// cleanly plus the per-record failures, which callers surface and skip.
#[derive(Debug)]
pub struct NormalizedSnapshot {
    pub stations: Vec<NormalizedStation>,
    pub errors: Vec<NormalizeError>,
}

impl NormalizedSnapshot {
    /// Map view keyed by station id, the form persisted per timestamp.
    pub fn to_processed(&self) -> ProcessedSnapshot {
        self.stations
            .iter()
            .map(|s| (s.id.clone(), s.record))
            .collect()
    }
}

/// Normalizes every feature in a payload. A failing record never takes down
/// its siblings; when the same id appears twice the first occurrence wins and
/// the repeat is reported.
pub fn normalize_snapshot(features: &[StationFeature]) -> NormalizedSnapshot {
    let mut stations: Vec<NormalizedStation> = Vec::with_capacity(features.len());
    let mut seen: BTreeSet<StationId> = BTreeSet::new();
    let mut errors = Vec::new();

    for feature in features {
        match normalize_feature(feature) {
            Ok(station) => {
                if seen.contains(&station.id) {
                    errors.push(NormalizeError::DuplicateStation {
                        station_id: station.id,
                    });
                    continue;
                }
                seen.insert(station.id.clone());
                stations.push(station);
            }
            Err(e) => errors.push(e),
        }
    }

    NormalizedSnapshot { stations, errors }
}

/// Normalizes one feature.
///
/// A station counts as active only when it is installed, renting, and
/// returning. Counts reported by an inactive station are not meaningful and
/// are never read; the record carries zeros and no score.
pub fn normalize_feature(feature: &StationFeature) -> Result<NormalizedStation, NormalizeError> {
    let station = &feature.properties.station;
    let id = station.id.clone();
    let is_active = station.installed && station.renting && station.returning;

    let record = if is_active {
        let bikes = require(station.bikes_available, &id, "bikes_available")?;
        let docks = require(station.docks_available, &id, "docks_available")?;
        let capacity = require(station.capacity, &id, "capacity")?;
        let score = match feature.properties.bike_angels_action.as_deref() {
            Some(action) => Some(resolve_score(
                &id,
                action,
                feature.properties.bike_angels_points,
            )?),
            None => None,
        };
        CompactStationRecord {
            is_active: true,
            bikes,
            docks,
            capacity,
            score,
        }
    } else {
        CompactStationRecord {
            is_active: false,
            bikes: 0,
            docks: 0,
            capacity: 0,
            score: None,
        }
    };

    Ok(NormalizedStation {
        id,
        name: station.name.clone(),
        coords: feature.geometry.lat_lon(),
        record,
    })
}

/// Resolves the signed imbalance score. `give` asks riders to bring bikes in
/// and maps to a negative score; `take` asks riders to remove bikes and maps
/// to a positive score; `neutral` is zero and does not read the magnitude.
fn resolve_score(
    station_id: &str,
    action: &str,
    points: Option<i64>,
) -> Result<i64, NormalizeError> {
    match action {
        "neutral" => Ok(0),
        "take" => require(points, station_id, "bike_angels_points"),
        "give" => require(points, station_id, "bike_angels_points").map(|p| -p),
        _ => Err(NormalizeError::UnrecognizedAction {
            station_id: station_id.to_string(),
            action: action.to_string(),
        }),
    }
}

fn require(
    value: Option<i64>,
    station_id: &str,
    field: &'static str,
) -> Result<i64, NormalizeError> {
    value.ok_or_else(|| NormalizeError::MissingField {
        station_id: station_id.to_string(),
        field,
    })
}
