// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The combined model handed to render sinks.
//!
//! Built incrementally by the aggregator as each account's stream completes,
//! read-only afterwards.

use std::collections::{HashMap, HashSet};

use geo::Point;

use crate::geo_utils::{haversine_meters, running_mean};
use crate::models::{Activity, ActivityKey, ActivityKind};

/// Color assigned to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountColor {
    pub alias: String,
    /// CSS hex color (`#8b5cf6`)
    pub color: String,
}

/// Per-account totals shown in summaries and map legends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountStats {
    pub total: u32,
    pub runs: u32,
    pub walks: u32,
    pub rides: u32,
    pub other: u32,
    pub distance_meters: f64,
}

impl AccountStats {
    fn record(&mut self, activity: &Activity) {
        self.total += 1;
        self.distance_meters += activity.distance_meters;
        match activity.kind() {
            ActivityKind::Run => self.runs += 1,
            ActivityKind::Walk => self.walks += 1,
            ActivityKind::Ride => self.rides += 1,
            ActivityKind::Other => self.other += 1,
        }
    }
}

/// Activities whose start points lie near each other.
#[derive(Debug, Clone)]
pub struct GeoCluster {
    pub id: usize,
    /// Mean of member start points
    pub centroid: Point<f64>,
    /// Largest distance from the centroid to a member start (meters)
    pub radius_meters: f64,
    pub members: Vec<ActivityKey>,
    starts: Vec<Point<f64>>,
}

impl GeoCluster {
    pub fn new(id: usize, key: ActivityKey, start: Point<f64>) -> Self {
        Self {
            id,
            centroid: start,
            radius_meters: 0.0,
            members: vec![key],
            starts: vec![start],
        }
    }

    /// Distance from the current centroid to `point` (meters).
    pub fn distance_to(&self, point: Point<f64>) -> f64 {
        haversine_meters(self.centroid, point)
    }

    /// Add a member and update centroid and radius.
    pub fn absorb(&mut self, key: ActivityKey, start: Point<f64>) {
        self.centroid = running_mean(self.centroid, self.starts.len(), start);
        self.members.push(key);
        self.starts.push(start);
        let centroid = self.centroid;
        self.radius_meters = self
            .starts
            .iter()
            .map(|p| haversine_meters(centroid, *p))
            .fold(0.0, f64::max);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Unified model across all accounts.
#[derive(Debug, Clone, Default)]
pub struct AggregatedModel {
    /// Account colors in first-seen order
    pub colors: Vec<AccountColor>,
    /// All activities in the order they were folded in
    pub activities: Vec<Activity>,
    pub clusters: Vec<GeoCluster>,
    pub stats: HashMap<String, AccountStats>,
    pub(crate) index: HashMap<ActivityKey, usize>,
}

impl AggregatedModel {
    /// Insert an activity.
    ///
    /// Returns `false` (and leaves the model untouched) if the
    /// `(alias, id)` pair is already present.
    pub fn insert(&mut self, activity: Activity) -> bool {
        let key = activity.key();
        if self.contains(&key) {
            return false;
        }

        self.stats
            .entry(activity.account_alias.clone())
            .or_default()
            .record(&activity);
        self.index.insert(key, self.activities.len());
        self.activities.push(activity);
        true
    }

    pub fn contains(&self, key: &ActivityKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn activity(&self, key: &ActivityKey) -> Option<&Activity> {
        self.index.get(key).map(|&i| &self.activities[i])
    }

    pub fn color_of(&self, alias: &str) -> Option<&str> {
        self.colors
            .iter()
            .find(|c| c.alias == alias)
            .map(|c| c.color.as_str())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.colors.iter().map(|c| c.alias.as_str())
    }

    /// Members of a cluster, in insertion order.
    pub fn cluster_activities<'a>(
        &'a self,
        cluster: &'a GeoCluster,
    ) -> impl Iterator<Item = &'a Activity> + 'a {
        cluster.members.iter().filter_map(|k| self.activity(k))
    }

    /// Member count per account for one cluster.
    pub fn cluster_counts_by_account(&self, cluster: &GeoCluster) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for key in &cluster.members {
            *counts.entry(key.account_alias.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// All referenced account aliases have a color.
    pub fn aliases_resolve(&self) -> bool {
        let known: HashSet<&str> = self.aliases().collect();
        self.activities
            .iter()
            .all(|a| known.contains(a.account_alias.as_str()))
    }
}
