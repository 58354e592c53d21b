//! Great-circle distance math shared by the registry and the pair finder.

/// Latitude-first coordinate pair, in degrees.
pub type LatLon = (f64, f64);

pub const METERS_PER_MILE: f64 = 1609.344;

/// Haversine distance between two points on a spherical earth, in meters.
pub fn haversine_meters(a: LatLon, b: LatLon) -> f64 {
    let r = 6_371_000.0_f64;
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    r * c
}

/// Haversine distance in miles.
pub fn haversine_miles(a: LatLon, b: LatLon) -> f64 {
    haversine_meters(a, b) / METERS_PER_MILE
}
