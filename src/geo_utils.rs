// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geographic helpers shared by the fetcher, the aggregator and the sinks.
//!
//! Points follow the `geo` convention: `x` is longitude, `y` is latitude.

use geo::{Distance, Haversine, LineString, Point};

/// Strava encodes `summary_polyline` with 5 decimal digits.
pub const POLYLINE_PRECISION: u32 = 5;

/// Decode an encoded polyline into an ordered path.
pub fn decode_path(encoded: &str) -> Result<LineString<f64>, String> {
    // Every chunk character is `value + 63`, so anything outside '?'..='~' is corrupt.
    if let Some(bad) = encoded.chars().find(|c| !('?'..='~').contains(c)) {
        return Err(format!("invalid polyline character {:?}", bad));
    }
    polyline::decode_polyline(encoded, POLYLINE_PRECISION).map_err(|e| e.to_string())
}

/// Build a point from a `[lat, lng]` pair as Strava returns it.
pub fn point_from_latlng(lat: f64, lng: f64) -> Point<f64> {
    Point::new(lng, lat)
}

/// Great-circle distance in meters.
pub fn haversine_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine.distance(a, b)
}

/// Fold one more point into a running mean of `count` points.
pub fn running_mean(mean: Point<f64>, count: usize, next: Point<f64>) -> Point<f64> {
    let n = (count + 1) as f64;
    Point::new(
        mean.x() + (next.x() - mean.x()) / n,
        mean.y() + (next.y() - mean.y()) / n,
    )
}

/// Path as `(lat, lng)` pairs.
pub fn to_latlng_pairs(path: &LineString<f64>) -> Vec<(f64, f64)> {
    path.coords().map(|c| (c.y, c.x)).collect()
}
