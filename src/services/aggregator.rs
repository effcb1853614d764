// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Merges per-account activity streams into one [`AggregatedModel`].
//!
//! Folding an account:
//! 1. Assign the account a color (first-seen order)
//! 2. Insert each activity, skipping `(alias, id)` pairs already present
//! 3. Place each new activity's start point into a geographic cluster
//!
//! Clustering is a single greedy pass: an activity joins the nearest cluster
//! whose centroid lies within the radius, otherwise it seeds a new one. The
//! result depends on insertion order and is an accepted approximation.

use geo::Point;

use crate::models::{AccountColor, Activity, ActivityKey, AggregatedModel, GeoCluster};

/// Account colors, assigned in the order accounts are first seen.
pub const PALETTE: [&str; 10] = [
    "#ef4444", "#3b82f6", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#06b6d4", "#84cc16",
    "#f97316", "#6366f1",
];

/// Default cluster radius (25 km).
pub const DEFAULT_CLUSTER_RADIUS_METERS: f64 = 25_000.0;

/// Counts from folding one account's activities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldSummary {
    pub added: usize,
    pub duplicates: usize,
}

/// Builds the combined model account by account.
pub struct Aggregator {
    cluster_radius_meters: f64,
    model: AggregatedModel,
}

impl Aggregator {
    pub fn new(cluster_radius_meters: f64) -> Self {
        Self {
            cluster_radius_meters,
            model: AggregatedModel::default(),
        }
    }

    /// Color for `alias`, assigning the next palette entry on first sight.
    pub fn register_account(&mut self, alias: &str) -> &str {
        let index = match self.model.colors.iter().position(|c| c.alias == alias) {
            Some(index) => index,
            None => {
                let color = PALETTE[self.model.colors.len() % PALETTE.len()];
                tracing::debug!(alias, color, "Assigned account color");
                self.model.colors.push(AccountColor {
                    alias: alias.to_string(),
                    color: color.to_string(),
                });
                self.model.colors.len() - 1
            }
        };
        &self.model.colors[index].color
    }

    /// Merge one account's activities into the model.
    pub fn fold_account(&mut self, alias: &str, activities: Vec<Activity>) -> FoldSummary {
        self.register_account(alias);

        let mut summary = FoldSummary::default();
        for activity in activities {
            let key = activity.key();
            let start = activity.start;

            if !self.model.insert(activity) {
                tracing::debug!(
                    alias,
                    activity_id = key.activity_id,
                    "Duplicate activity, skipping"
                );
                summary.duplicates += 1;
                continue;
            }
            summary.added += 1;

            if let Some(start) = start {
                self.place(key, start);
            }
        }

        tracing::info!(
            alias,
            added = summary.added,
            duplicates = summary.duplicates,
            clusters = self.model.clusters.len(),
            "Account folded into model"
        );
        summary
    }

    /// Greedy cluster assignment for one start point.
    fn place(&mut self, key: ActivityKey, start: Point<f64>) {
        let radius = self.cluster_radius_meters;
        let nearest = self
            .model
            .clusters
            .iter_mut()
            .map(|cluster| (cluster.distance_to(start), cluster))
            .filter(|(distance, _)| *distance <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((_, cluster)) => cluster.absorb(key, start),
            None => {
                let id = self.model.clusters.len();
                self.model.clusters.push(GeoCluster::new(id, key, start));
            }
        }
    }

    pub fn model(&self) -> &AggregatedModel {
        &self.model
    }

    pub fn finish(self) -> AggregatedModel {
        self.model
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER_RADIUS_METERS)
    }
}
