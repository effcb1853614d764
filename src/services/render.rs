// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Map documents produced from the aggregated model.
//!
//! [`GeoJsonSink`] writes plain GeoJSON files that any offline viewer
//! (QGIS, geojson.io, a Leaflet page) can open:
//! - `combined_routes_<stamp>.geojson`: every route, colored by account
//! - `combined_heatmap_<stamp>.geojson`: one point per cluster
//! - `location_maps_<stamp>/cluster_<id>.geojson`: one document per cluster

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde_json::json;

use crate::error::{Result, SyncError};
use crate::models::{Activity, AggregatedModel, GeoCluster};
use crate::time_utils::{format_file_stamp, format_utc_rfc3339, Clock};

/// Files written by a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedArtifacts {
    pub routes: Option<PathBuf>,
    pub heatmap: Option<PathBuf>,
    pub cluster_docs: Vec<PathBuf>,
}

impl RenderedArtifacts {
    pub fn is_empty(&self) -> bool {
        self.routes.is_none() && self.heatmap.is_none() && self.cluster_docs.is_empty()
    }

    pub fn all_paths(&self) -> impl Iterator<Item = &Path> {
        self.routes
            .iter()
            .chain(self.heatmap.iter())
            .chain(self.cluster_docs.iter())
            .map(PathBuf::as_path)
    }
}

/// Consumer of the finished model.
pub trait RenderSink {
    fn render(&self, model: &AggregatedModel) -> Result<RenderedArtifacts>;
}

/// Writes GeoJSON documents into `output_dir`.
pub struct GeoJsonSink {
    output_dir: PathBuf,
    stamp: String,
}

impl GeoJsonSink {
    pub fn new(output_dir: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            stamp: stamp.into(),
        }
    }

    /// Sink stamped with the clock's current time.
    pub fn for_run(output_dir: impl Into<PathBuf>, clock: &dyn Clock) -> Self {
        Self::new(output_dir, format_file_stamp(clock.now()))
    }

    pub fn routes_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("combined_routes_{}.geojson", self.stamp))
    }

    pub fn heatmap_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("combined_heatmap_{}.geojson", self.stamp))
    }

    fn cluster_dir_name(&self) -> String {
        format!("location_maps_{}", self.stamp)
    }

    fn cluster_file_name(cluster: &GeoCluster) -> String {
        format!("cluster_{}.geojson", cluster.id)
    }

    fn routes_document(model: &AggregatedModel) -> FeatureCollection {
        let features = model
            .activities
            .iter()
            .filter(|a| a.has_route())
            .map(|a| route_feature(a, model.color_of(&a.account_alias)))
            .collect();
        collection(features)
    }

    fn heatmap_document(&self, model: &AggregatedModel) -> FeatureCollection {
        let features = model
            .clusters
            .iter()
            .map(|cluster| {
                let counts = model.cluster_counts_by_account(cluster);
                let mut props = JsonObject::new();
                props.insert("cluster_id".to_string(), json!(cluster.id));
                props.insert("count".to_string(), json!(cluster.len()));
                props.insert("radius_m".to_string(), json!(cluster.radius_meters.round()));
                props.insert("color".to_string(), json!(dominant_color(model, &counts)));
                props.insert(
                    "detail".to_string(),
                    json!(format!(
                        "{}/{}",
                        self.cluster_dir_name(),
                        Self::cluster_file_name(cluster)
                    )),
                );
                props.insert("by_account".to_string(), json!(counts));
                feature(Value::from(&cluster.centroid), props)
            })
            .collect();
        collection(features)
    }

    fn cluster_document(model: &AggregatedModel, cluster: &GeoCluster) -> FeatureCollection {
        let mut center = JsonObject::new();
        center.insert("cluster_id".to_string(), json!(cluster.id));
        center.insert("count".to_string(), json!(cluster.len()));
        center.insert("radius_m".to_string(), json!(cluster.radius_meters.round()));

        let mut features = vec![feature(Value::from(&cluster.centroid), center)];
        features.extend(
            model
                .cluster_activities(cluster)
                .filter(|a| a.has_route())
                .map(|a| route_feature(a, model.color_of(&a.account_alias))),
        );
        collection(features)
    }
}

impl RenderSink for GeoJsonSink {
    fn render(&self, model: &AggregatedModel) -> Result<RenderedArtifacts> {
        if model.is_empty() {
            tracing::info!("No activities to render");
            return Ok(RenderedArtifacts::default());
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            SyncError::Render(format!("{}: {}", self.output_dir.display(), e))
        })?;

        let mut artifacts = RenderedArtifacts::default();

        let routes = self.routes_path();
        write_document(&routes, Self::routes_document(model))?;
        artifacts.routes = Some(routes);

        let heatmap = self.heatmap_path();
        write_document(&heatmap, self.heatmap_document(model))?;
        artifacts.heatmap = Some(heatmap);

        if !model.clusters.is_empty() {
            let cluster_dir = self.output_dir.join(self.cluster_dir_name());
            std::fs::create_dir_all(&cluster_dir)
                .map_err(|e| SyncError::Render(format!("{}: {}", cluster_dir.display(), e)))?;

            for cluster in &model.clusters {
                let path = cluster_dir.join(Self::cluster_file_name(cluster));
                write_document(&path, Self::cluster_document(model, cluster))?;
                artifacts.cluster_docs.push(path);
            }
        }

        tracing::info!(
            routes = model.activities.iter().filter(|a| a.has_route()).count(),
            clusters = model.clusters.len(),
            output_dir = %self.output_dir.display(),
            "Maps written"
        );
        Ok(artifacts)
    }
}

fn route_feature(activity: &Activity, color: Option<&str>) -> Feature {
    let mut props = JsonObject::new();
    props.insert("account".to_string(), json!(activity.account_alias));
    props.insert("color".to_string(), json!(color));
    props.insert("activity_id".to_string(), json!(activity.id));
    props.insert("name".to_string(), json!(activity.name));
    props.insert("activity_type".to_string(), json!(activity.activity_type));
    props.insert("distance_m".to_string(), json!(activity.distance_meters.round()));
    props.insert(
        "start_date".to_string(),
        json!(format_utc_rfc3339(activity.start_date)),
    );
    feature(Value::from(&activity.path), props)
}

fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Color of the account with the most members; ties go to the account seen
/// first.
fn dominant_color<'a>(
    model: &'a AggregatedModel,
    counts: &HashMap<String, u32>,
) -> Option<&'a str> {
    let mut best: Option<(&str, u32)> = None;
    for entry in &model.colors {
        let count = counts.get(&entry.alias).copied().unwrap_or(0);
        if count > 0 && best.map_or(true, |(_, n)| count > n) {
            best = Some((entry.color.as_str(), count));
        }
    }
    best.map(|(color, _)| color)
}

fn write_document(path: &Path, document: FeatureCollection) -> Result<()> {
    let body = GeoJson::FeatureCollection(document).to_string();
    std::fs::write(path, body)
        .map_err(|e| SyncError::Render(format!("{}: {}", path.display(), e)))
}
