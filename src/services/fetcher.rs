// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Complete activity history retrieval for one account.
//!
//! Handles the paging loop:
//! 1. Request pages in order until a short (or empty) page arrives
//! 2. Back off and retry on throttled responses
//! 3. Refresh the token once if Strava rejects it mid-fetch
//! 4. Decode each summary into an [`Activity`], skipping undecodable ones

use chrono::{DateTime, Utc};
use geo::{LineString, Point};

use crate::error::{Result, SyncError};
use crate::geo_utils::{decode_path, point_from_latlng};
use crate::models::{Account, Activity};
use crate::services::auth::TokenRefresher;
use crate::services::backoff::BackoffPolicy;
use crate::services::strava::{PageQuery, StravaActivitySummary, StravaApi};

/// Default page size; Strava allows up to 200 but smaller pages are gentler
/// on the rate limit.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Largest page size Strava accepts.
pub const MAX_PER_PAGE: u32 = 200;

/// Paging and date-window options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub per_page: u32,
    /// Only activities after this Unix timestamp
    pub after: Option<i64>,
    /// Only activities before this Unix timestamp
    pub before: Option<i64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            after: None,
            before: None,
        }
    }
}

/// Result of syncing one account.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub activities: Vec<Activity>,
    /// Per-activity decode failures (skipped, not fatal)
    pub skipped: Vec<SyncError>,
    /// Pages successfully retrieved
    pub pages: u32,
}

/// Pulls every activity of one account.
pub struct ActivityFetcher<'a, A> {
    api: &'a A,
    options: FetchOptions,
    backoff: BackoffPolicy,
}

impl<'a, A: StravaApi> ActivityFetcher<'a, A> {
    pub fn new(api: &'a A, options: FetchOptions, backoff: BackoffPolicy) -> Self {
        Self {
            api,
            options: FetchOptions {
                per_page: options.per_page.clamp(1, MAX_PER_PAGE),
                ..options
            },
            backoff,
        }
    }

    /// Fetch the account's full history.
    ///
    /// `account.token` must be set. If Strava rejects it, `refresher` is asked
    /// for a new one exactly once and the new token is stored on the account.
    pub async fn fetch_all<R: TokenRefresher>(
        &self,
        account: &mut Account,
        refresher: &mut R,
    ) -> Result<FetchOutcome> {
        let alias = account.alias.clone();
        let mut token = account
            .token
            .clone()
            .ok_or_else(|| SyncError::AccountAuth(alias.clone()))?;

        let mut outcome = FetchOutcome::default();
        let mut page = 1u32;
        let mut reauthorized = false;

        loop {
            let query = PageQuery {
                page,
                per_page: self.options.per_page,
                after: self.options.after,
                before: self.options.before,
            };

            let records = match self.fetch_page(&token.access_token, &query).await {
                Ok(records) => records,
                Err(SyncError::Unauthorized) if !reauthorized => {
                    tracing::warn!(alias = %alias, page, "Token rejected, refreshing once");
                    reauthorized = true;
                    token = refresher
                        .refresh_after_rejection(account, &token)
                        .await
                        .map_err(|e| {
                            tracing::error!(alias = %alias, error = %e, "Token refresh failed");
                            SyncError::AccountAuth(alias.clone())
                        })?;
                    account.token = Some(token.clone());
                    continue;
                }
                Err(SyncError::Unauthorized) => return Err(SyncError::AccountAuth(alias)),
                Err(e) => return Err(e),
            };

            outcome.pages += 1;
            let count = records.len();

            for record in records {
                match decode_record(&alias, record) {
                    Ok(activity) => outcome.activities.push(activity),
                    Err(e) => {
                        tracing::warn!(alias = %alias, error = %e, "Skipping activity");
                        outcome.skipped.push(e);
                    }
                }
            }

            tracing::info!(
                alias = %alias,
                page,
                fetched = outcome.activities.len(),
                "Activities loaded"
            );

            // A full page is ambiguous, so only a short page ends the history.
            if count < self.options.per_page as usize {
                break;
            }
            page += 1;
        }

        Ok(outcome)
    }

    /// One page, retrying throttled responses per the backoff policy.
    async fn fetch_page(
        &self,
        access_token: &str,
        query: &PageQuery,
    ) -> Result<Vec<serde_json::Value>> {
        let mut attempt = 0u32;

        loop {
            match self.api.list_activities(access_token, query).await {
                Err(SyncError::RateLimited { retry_after }) => {
                    attempt += 1;
                    let Some(delay) = self.backoff.next_delay(attempt, retry_after) else {
                        return Err(SyncError::RateLimitExceeded { attempts: attempt });
                    };
                    tracing::warn!(
                        page = query.page,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Convert one raw page record into an [`Activity`].
pub fn decode_record(alias: &str, record: serde_json::Value) -> Result<Activity> {
    decode_activity(alias, StravaActivitySummary::from_record(record)?)
}

/// Convert a Strava summary into an [`Activity`].
pub fn decode_activity(alias: &str, summary: StravaActivitySummary) -> Result<Activity> {
    let activity_id = summary.id;
    let decode_error = |reason: String| SyncError::Decode {
        activity_id,
        reason,
    };

    let start_date = DateTime::parse_from_rfc3339(&summary.start_date)
        .map_err(|e| decode_error(format!("invalid start_date: {}", e)))?
        .with_timezone(&Utc);

    let path = match summary.get_polyline() {
        Some(encoded) => decode_path(encoded).map_err(decode_error)?,
        None => LineString::new(Vec::new()),
    };

    let start = summary
        .start_coords()
        .map(|(lat, lng)| point_from_latlng(lat, lng))
        .or_else(|| path.0.first().map(|c| Point::from(*c)));

    Ok(Activity {
        id: activity_id,
        account_alias: alias.to_string(),
        activity_type: summary.sport().to_string(),
        name: summary.name,
        distance_meters: summary.distance,
        start_date,
        start,
        path,
    })
}
