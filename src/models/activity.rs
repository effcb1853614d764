// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity model shared by the fetcher, the aggregator and the sinks.

use chrono::{DateTime, Utc};
use geo::{LineString, Point};

/// Activity IDs are only unique per account, so the key carries the alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey {
    pub account_alias: String,
    pub activity_id: u64,
}

/// A fetched activity. Never mutated after decoding.
#[derive(Debug, Clone)]
pub struct Activity {
    /// Strava activity ID
    pub id: u64,
    /// Alias of the owning account
    pub account_alias: String,
    /// Activity name/title
    pub name: String,
    /// Sport type (Ride, Run, Hike, etc.)
    pub activity_type: String,
    /// Distance in meters
    pub distance_meters: f64,
    /// Start date/time
    pub start_date: DateTime<Utc>,
    /// Start coordinate, from `start_latlng` or the first path point
    pub start: Option<Point<f64>>,
    /// Decoded route (empty for activities recorded without GPS)
    pub path: LineString<f64>,
}

impl Activity {
    pub fn key(&self) -> ActivityKey {
        ActivityKey {
            account_alias: self.account_alias.clone(),
            activity_id: self.id,
        }
    }

    pub fn kind(&self) -> ActivityKind {
        ActivityKind::from_sport_type(&self.activity_type)
    }

    pub fn has_route(&self) -> bool {
        self.path.0.len() >= 2
    }
}

/// Coarse grouping of sport types used in per-account statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Run,
    Walk,
    Ride,
    Other,
}

impl ActivityKind {
    pub fn from_sport_type(sport_type: &str) -> Self {
        match sport_type.to_ascii_lowercase().as_str() {
            "run" | "trailrun" | "virtualrun" => ActivityKind::Run,
            "walk" | "hike" => ActivityKind::Walk,
            "ride" | "mountainbikeride" | "gravelride" | "ebikeride" | "emountainbikeride"
            | "virtualride" => ActivityKind::Ride,
            _ => ActivityKind::Other,
        }
    }
}
