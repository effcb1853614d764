// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync pipeline.

pub mod aggregator;
pub mod auth;
pub mod backoff;
pub mod fetcher;
pub mod render;
pub mod strava;
pub mod sync;

pub use aggregator::{Aggregator, FoldSummary, PALETTE};
pub use auth::{AuthFlow, AuthSettings, CallbackOutcome, CallbackSource, TokenRefresher};
pub use backoff::BackoffPolicy;
pub use fetcher::{ActivityFetcher, FetchOptions, FetchOutcome};
pub use render::{GeoJsonSink, RenderSink, RenderedArtifacts};
pub use strava::{StravaApi, StravaClient};
pub use sync::{AccountOutcome, AccountSummary, SyncEngine, SyncReport, SyncSettings};
