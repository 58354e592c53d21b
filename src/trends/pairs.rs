//! Spatial pairing of stations and divergence filtering.
//!
//! Nearby pairs are a derived artifact of the registry's latest coordinates.
//! The persisted cache is tagged with a fingerprint of the exact coordinate
//! set it was computed from and is recomputed whenever that set or the
//! radius changes; a stale cache is never silently reused.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::geo::{self, LatLon};
use crate::snapshot::StationId;

/// All station pairs within a fixed great-circle radius of each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPairs {
    fingerprint: String,
    radius_miles: f64,
    /// Sorted station ids; `neighbors` indexes into this list.
    station_ids: Vec<StationId>,
    /// Station index to the higher-indexed stations within the radius.
    neighbors: BTreeMap<usize, Vec<usize>>,
}

impl NearbyPairs {
    /// Computes the all-pairs nearby set. Quadratic over the station count,
    /// which is fine for networks in the low thousands.
    pub fn compute(coords: &BTreeMap<StationId, LatLon>, radius_miles: f64) -> Self {
        let station_ids: Vec<StationId> = coords.keys().cloned().collect();
        let positions: Vec<LatLon> = coords.values().copied().collect();

        let mut neighbors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..positions.len() {
            let mut close = Vec::new();
            for j in (i + 1)..positions.len() {
                if geo::haversine_miles(positions[i], positions[j]) < radius_miles {
                    close.push(j);
                }
            }
            neighbors.insert(i, close);
        }

        Self {
            fingerprint: coordinate_fingerprint(coords),
            radius_miles,
            station_ids,
            neighbors,
        }
    }

    /// Number of nearby pairs.
    pub fn len(&self) -> usize {
        self.neighbors.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symmetric membership test.
    pub fn contains(&self, a: &str, b: &str) -> bool {
        let (Ok(i), Ok(j)) = (
            self.station_ids.binary_search_by(|id| id.as_str().cmp(a)),
            self.station_ids.binary_search_by(|id| id.as_str().cmp(b)),
        ) else {
            return false;
        };
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        if lo == hi {
            return false;
        }
        self.neighbors.get(&lo).is_some_and(|ns| ns.contains(&hi))
    }

    /// All nearby pairs as (lower id, higher id), in deterministic order.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.neighbors.iter().flat_map(move |(&i, ns)| {
            ns.iter().map(move |&j| {
                (
                    self.station_ids[i].as_str(),
                    self.station_ids[j].as_str(),
                )
            })
        })
    }

    /// True when this cache was computed from exactly these coordinates at
    /// this radius.
    pub fn is_valid_for(&self, coords: &BTreeMap<StationId, LatLon>, radius_miles: f64) -> bool {
        self.radius_miles == radius_miles && self.fingerprint == coordinate_fingerprint(coords)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading nearby-pairs cache {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing nearby-pairs cache {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing nearby-pairs cache {}", path.display()))?;
        Ok(())
    }

    /// Returns the cache at `path` when it matches the current coordinate
    /// set, recomputing and rewriting it otherwise.
    pub fn load_or_compute(
        path: impl AsRef<Path>,
        coords: &BTreeMap<StationId, LatLon>,
        radius_miles: f64,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let cached = Self::load(path)?;
            if cached.is_valid_for(coords, radius_miles) {
                debug!(path = %path.display(), "nearby-pairs cache is current");
                return Ok(cached);
            }
            info!(path = %path.display(), "nearby-pairs cache is stale, recomputing");
        }
        let pairs = Self::compute(coords, radius_miles);
        pairs.save(path)?;
        Ok(pairs)
    }
}

/// SHA-256 over the sorted (id, lat, lon) set, hex-encoded. Identifies the
/// exact coordinate snapshot a derived artifact was computed from.
pub fn coordinate_fingerprint(coords: &BTreeMap<StationId, LatLon>) -> String {
    let mut hasher = Sha256::new();
    for (id, (lat, lon)) in coords {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(lat.to_bits().to_be_bytes());
        hasher.update(lon.to_bits().to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Nearby pairs whose bucket means differ by strictly more than `min_diff`.
/// Pairs where either station lacks statistics for the bucket are excluded.
pub fn diverging_pairs(
    pairs: &NearbyPairs,
    means: &BTreeMap<StationId, f64>,
    min_diff: f64,
) -> Vec<(StationId, StationId)> {
    pairs
        .iter_pairs()
        .filter_map(|(a, b)| {
            let (Some(ma), Some(mb)) = (means.get(a), means.get(b)) else {
                return None;
            };
            ((ma - mb).abs() > min_diff).then(|| (a.to_string(), b.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Three stations on a north-south line: a and b are about 0.3 miles
    // apart, c sits about 2 miles north of a.
    fn coords() -> BTreeMap<StationId, LatLon> {
        BTreeMap::from([
            ("a".to_string(), (42.3600, -71.0589)),
            ("b".to_string(), (42.3643, -71.0589)),
            ("c".to_string(), (42.3889, -71.0589)),
        ])
    }

    #[test]
    fn test_compute_finds_close_pairs_only() {
        let pairs = NearbyPairs::compute(&coords(), 0.5);
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains("a", "b"));
        assert!(!pairs.contains("a", "c"));
        assert!(!pairs.contains("b", "c"));
    }

    #[test]
    fn test_contains_is_symmetric() {
        let pairs = NearbyPairs::compute(&coords(), 0.5);
        assert_eq!(pairs.contains("a", "b"), pairs.contains("b", "a"));
        assert!(!pairs.contains("a", "a"));
        assert!(!pairs.contains("a", "zzz"));
    }

    #[test]
    fn test_radius_boundary_is_strict() {
        let coords = coords();
        // a-b is about 0.30 miles apart.
        assert_eq!(NearbyPairs::compute(&coords, 0.31).len(), 1);
        assert_eq!(NearbyPairs::compute(&coords, 0.29).len(), 0);
    }

    #[test]
    fn test_iter_pairs_orders_by_id() {
        let pairs = NearbyPairs::compute(&coords(), 3.0);
        let listed: Vec<(String, String)> = pairs
            .iter_pairs()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a".to_string(), "b".to_string()),
                ("a".to_string(), "c".to_string()),
                ("b".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_fingerprint_tracks_coordinate_set() {
        let base = coords();
        assert_eq!(coordinate_fingerprint(&base), coordinate_fingerprint(&coords()));

        let mut moved = coords();
        moved.insert("a".to_string(), (42.3601, -71.0589));
        assert_ne!(coordinate_fingerprint(&base), coordinate_fingerprint(&moved));

        let mut extra = coords();
        extra.insert("d".to_string(), (42.40, -71.05));
        assert_ne!(coordinate_fingerprint(&base), coordinate_fingerprint(&extra));
    }

    #[test]
    fn test_cache_roundtrip_and_staleness() {
        let path = std::env::temp_dir().join(format!("nearby_pairs_{}.json", std::process::id()));

        let pairs = NearbyPairs::load_or_compute(&path, &coords(), 0.5).unwrap();
        assert!(pairs.contains("a", "b"));

        // Same coordinates: the cache is reused as-is.
        let reloaded = NearbyPairs::load_or_compute(&path, &coords(), 0.5).unwrap();
        assert_eq!(reloaded, pairs);

        // A station moved: the cache must be recomputed.
        let mut moved = coords();
        moved.insert("c".to_string(), (42.3620, -71.0589));
        let recomputed = NearbyPairs::load_or_compute(&path, &moved, 0.5).unwrap();
        assert!(recomputed.is_valid_for(&moved, 0.5));
        assert!(!recomputed.is_valid_for(&coords(), 0.5));
        assert!(recomputed.contains("a", "c"));

        // A different radius also invalidates.
        let wider = NearbyPairs::load_or_compute(&path, &moved, 3.0).unwrap();
        assert!(wider.contains("a", "b"));
        assert!(!recomputed.is_valid_for(&moved, 3.0));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_diverging_pairs_threshold_is_strict() {
        let pairs = NearbyPairs::compute(&coords(), 0.5);
        let means = BTreeMap::from([("a".to_string(), -3.0), ("b".to_string(), 0.0)]);

        assert_eq!(
            diverging_pairs(&pairs, &means, 2.5),
            vec![("a".to_string(), "b".to_string())]
        );
        // Exactly at the threshold is not divergent.
        assert!(diverging_pairs(&pairs, &means, 3.0).is_empty());
    }

    #[test]
    fn test_diverging_pairs_skips_missing_stations() {
        let pairs = NearbyPairs::compute(&coords(), 0.5);
        let means = BTreeMap::from([("a".to_string(), -3.0)]);
        assert!(diverging_pairs(&pairs, &means, 0.1).is_empty());
    }
}
