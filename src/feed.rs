//! Data model for one raw feed snapshot.
//!
//! A snapshot is a GeoJSON-style feature collection with one feature per
//! station. The upstream service occasionally serves an error object instead
//! of a collection; that sentinel carries no station data and is modeled as
//! its own variant rather than failing the parse.

use anyhow::Result;
use serde::{Deserialize, Deserializer};

use crate::snapshot::StationId;

/// One polled snapshot payload, before normalization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawSnapshot {
    /// Upstream error sentinel.
    Sentinel { error: String },
    /// Regular payload: one feature per station.
    Stations { features: Vec<StationFeature> },
}

#[derive(Debug, Deserialize)]
pub struct StationFeature {
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    /// Feed axis order is longitude first.
    pub coordinates: [f64; 2],
}

impl Geometry {
    /// Coordinates in internal latitude-first order.
    pub fn lat_lon(&self) -> (f64, f64) {
        (self.coordinates[1], self.coordinates[0])
    }
}

#[derive(Debug, Deserialize)]
pub struct FeatureProperties {
    pub station: StationInfo,
    #[serde(default)]
    pub bike_angels_action: Option<String>,
    #[serde(default)]
    pub bike_angels_points: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StationInfo {
    #[serde(deserialize_with = "station_id_from_any")]
    pub id: StationId,
    pub name: String,
    pub installed: bool,
    pub renting: bool,
    pub returning: bool,
    #[serde(default)]
    pub bikes_available: Option<i64>,
    #[serde(default)]
    pub docks_available: Option<i64>,
    #[serde(default)]
    pub capacity: Option<i64>,
}

/// The feed is inconsistent about id types: some payloads carry numbers and
/// some carry strings. Both normalize to the string form used as a map key.
fn station_id_from_any<'de, D>(deserializer: D) -> Result<StationId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(i64),
        Text(String),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Num(n) => n.to_string(),
        IdRepr::Text(s) => s,
    })
}

/// Decodes one raw snapshot payload from JSON bytes.
///
/// # Errors
///
/// Returns an error when the payload is neither a feature collection nor the
/// upstream error sentinel.
pub fn parse_snapshot(bytes: &[u8]) -> Result<RawSnapshot> {
    Ok(serde_json::from_slice(bytes)?)
}
