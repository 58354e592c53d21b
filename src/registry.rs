//! Station identity registry with drift reconciliation.
//!
//! The registry owns the authoritative name and coordinates of every station
//! ever seen, keyed by station id. All mutation goes through
//! [`StationRegistry::update`], which runs the reconciliation cascade and
//! appends to per-field change logs; recorded history is never overwritten.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::geo::{self, LatLon, METERS_PER_MILE};
use crate::snapshot::StationId;

/// Reconciliation constants, threaded explicitly instead of living as
/// process-wide state.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    /// Reference point of the network's home region.
    pub home: LatLon,
    /// Stations are expected to stay within this radius of `home`.
    pub home_radius_miles: f64,
    /// Coordinate moves below this are treated as GPS noise.
    pub jitter_meters: f64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        // The feed's home market is metro Boston; 15 miles covers the whole
        // service area with margin.
        Self {
            home: (42.3601, -71.0589),
            home_radius_miles: 15.0,
            jitter_meters: 100.0,
        }
    }
}

/// Structured result of reconciling one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Observed value equals the latest recorded value.
    Unchanged,
    /// Observed value accepted and appended to the change log.
    Accepted,
    /// Observed value accepted because it corrects a recorded value that had
    /// drifted outside the home region.
    AcceptedCorrection,
    /// Values disagree and no rule justifies the change; the recorded value
    /// is kept.
    RejectedMismatch,
}

impl FieldOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            FieldOutcome::Accepted | FieldOutcome::AcceptedCorrection
        )
    }
}

/// Result of one registry update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First sighting of this station id.
    Inserted,
    /// Station already known; per-field reconciliation results.
    Reconciled {
        coords: FieldOutcome,
        name: FieldOutcome,
    },
}

/// Append-only, timestamp-tagged change log for one identity field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldHistory<T> {
    entries: Vec<(i64, T)>,
}

impl<T> FieldHistory<T> {
    fn start(timestamp: i64, value: T) -> Self {
        Self {
            entries: vec![(timestamp, value)],
        }
    }

    fn append(&mut self, timestamp: i64, value: T) {
        self.entries.push((timestamp, value));
    }

    /// Latest recorded value.
    pub fn latest(&self) -> &T {
        // Construction and deserialization both guarantee at least one entry.
        &self.entries.last().expect("field history is never empty").1
    }

    /// Value in effect at `timestamp`: the last change at or before it.
    pub fn as_of(&self, timestamp: i64) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= timestamp)
            .map(|(_, v)| v)
    }

    /// Full change log, oldest first.
    pub fn entries(&self) -> &[(i64, T)] {
        &self.entries
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldHistory<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<(i64, T)>::deserialize(deserializer)?;
        if entries.is_empty() {
            return Err(serde::de::Error::custom("field history must not be empty"));
        }
        Ok(Self { entries })
    }
}

/// Authoritative identity of one station, with full change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationHistoryEntry {
    name: FieldHistory<String>,
    coords: FieldHistory<LatLon>,
    timestamp_added: i64,
}

impl StationHistoryEntry {
    pub fn latest_name(&self) -> &str {
        self.name.latest()
    }

    pub fn latest_coords(&self) -> LatLon {
        *self.coords.latest()
    }

    pub fn first_seen(&self) -> i64 {
        self.timestamp_added
    }

    pub fn name_history(&self) -> &FieldHistory<String> {
        &self.name
    }

    pub fn coords_history(&self) -> &FieldHistory<LatLon> {
        &self.coords
    }
}

#[derive(Debug)]
pub struct StationRegistry {
    stations: BTreeMap<StationId, StationHistoryEntry>,
    policy: ReconcilePolicy,
}

impl StationRegistry {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            stations: BTreeMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, station_id: &str) -> Option<&StationHistoryEntry> {
        self.stations.get(station_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StationId, &StationHistoryEntry)> {
        self.stations.iter()
    }

    /// Latest known coordinates of every station, the input to the pair
    /// finder.
    pub fn latest_coords(&self) -> BTreeMap<StationId, LatLon> {
        self.stations
            .iter()
            .map(|(id, entry)| (id.clone(), entry.latest_coords()))
            .collect()
    }

    /// Applies one observation of a station's identity.
    ///
    /// Unknown ids are inserted as-is. For known ids, name and coordinates
    /// are reconciled independently against the latest recorded values; a
    /// rejected field keeps its recorded value and the observation is only
    /// reported, never applied.
    pub fn update(
        &mut self,
        station_id: &str,
        name: &str,
        coords: LatLon,
        timestamp: i64,
    ) -> UpdateOutcome {
        let policy = self.policy;
        let Some(entry) = self.stations.get_mut(station_id) else {
            debug!(station_id, name, "first sighting, registering station");
            self.stations.insert(
                station_id.to_string(),
                StationHistoryEntry {
                    name: FieldHistory::start(timestamp, name.to_string()),
                    coords: FieldHistory::start(timestamp, coords),
                    timestamp_added: timestamp,
                },
            );
            return UpdateOutcome::Inserted;
        };

        let coords_outcome = reconcile_coords(&policy, station_id, entry, coords, timestamp);
        let name_outcome = reconcile_name(station_id, entry, name, timestamp);

        UpdateOutcome::Reconciled {
            coords: coords_outcome,
            name: name_outcome,
        }
    }

    /// Reads a registry file written by [`StationRegistry::save`].
    pub fn load(path: impl AsRef<Path>, policy: ReconcilePolicy) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading station registry {}", path.display()))?;
        let stations: BTreeMap<StationId, StationHistoryEntry> = serde_json::from_str(&content)
            .with_context(|| format!("parsing station registry {}", path.display()))?;
        Ok(Self { stations, policy })
    }

    /// Rewrites the registry file: a JSON map of station id to name and
    /// coordinate change logs plus the first-seen timestamp.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string(&self.stations)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing station registry {}", path.display()))?;
        Ok(())
    }
}

fn reconcile_coords(
    policy: &ReconcilePolicy,
    station_id: &str,
    entry: &mut StationHistoryEntry,
    observed: LatLon,
    timestamp: i64,
) -> FieldOutcome {
    let recorded = entry.latest_coords();
    if observed == recorded {
        return FieldOutcome::Unchanged;
    }

    let home_radius_meters = policy.home_radius_miles * METERS_PER_MILE;
    let recorded_from_home = geo::haversine_meters(recorded, policy.home);
    let observed_from_home = geo::haversine_meters(observed, policy.home);

    // The recorded value had drifted outside the home region and the new
    // observation brings the station back inside it.
    if observed_from_home < home_radius_meters && home_radius_meters < recorded_from_home {
        info!(
            station_id,
            from = ?recorded,
            to = ?observed,
            "coordinates corrected back into the home region"
        );
        entry.coords.append(timestamp, observed);
        return FieldOutcome::AcceptedCorrection;
    }

    let moved_meters = geo::haversine_meters(recorded, observed);
    if moved_meters < policy.jitter_meters {
        debug!(station_id, moved_meters, "coordinate jitter accepted");
        entry.coords.append(timestamp, observed);
        return FieldOutcome::Accepted;
    }

    warn!(
        station_id,
        recorded = ?recorded,
        observed = ?observed,
        moved_meters,
        "coordinate mismatch, keeping recorded value"
    );
    FieldOutcome::RejectedMismatch
}

fn reconcile_name(
    station_id: &str,
    entry: &mut StationHistoryEntry,
    observed: &str,
    timestamp: i64,
) -> FieldOutcome {
    let recorded = entry.name.latest().clone();
    if observed == recorded {
        return FieldOutcome::Unchanged;
    }

    if is_placeholder_name(&recorded) && !is_placeholder_name(observed) {
        info!(
            station_id,
            from = %recorded,
            to = %observed,
            "placeholder name upgraded"
        );
        entry.name.append(timestamp, observed.to_string());
        return FieldOutcome::Accepted;
    }

    warn!(
        station_id,
        recorded = %recorded,
        observed = %observed,
        "name mismatch, keeping recorded value"
    );
    FieldOutcome::RejectedMismatch
}

/// Matches the machine-generated identifier shape the feed assigns to freshly
/// provisioned stations: one or more ASCII letters followed by one or more
/// digits, and nothing else ("N1", "A32010").
pub fn is_placeholder_name(name: &str) -> bool {
    match name.find(|c: char| c.is_ascii_digit()) {
        Some(first_digit) if first_digit > 0 => {
            name[..first_digit].chars().all(|c| c.is_ascii_alphabetic())
                && name[first_digit..].chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}
