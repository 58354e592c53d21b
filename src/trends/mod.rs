//! Trend analysis stages: hourly series selection, per-bucket statistics,
//! and spatial pairing of divergent nearby stations.

pub mod buckets;
pub mod hourly;
pub mod pairs;
pub mod stats;
