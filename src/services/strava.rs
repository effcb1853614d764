// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client.
//!
//! Handles:
//! - Authorization URL construction
//! - Code exchange and token refresh
//! - Paginated activity listing
//! - Rate limit and token rejection detection (mapped to typed errors so the
//!   fetcher can decide whether to back off or refresh)

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SyncError};
use crate::models::Credentials;

pub const STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";
pub const STRAVA_OAUTH_BASE: &str = "https://www.strava.com/oauth";

/// Read access to all activities, including private ones.
pub const DEFAULT_SCOPE: &str = "activity:read_all";

/// Message Strava puts in the body when throttling.
const RATE_LIMIT_MESSAGE: &str = "Rate Limit Exceeded";

/// Operations the sync engine needs from Strava.
///
/// Implemented by [`StravaClient`] for real traffic and by scripted fakes in
/// tests.
pub trait StravaApi {
    /// Build the URL the operator opens to grant access.
    fn authorize_url(&self, client_id: &str, redirect_uri: &str, scope: &str, state: &str)
        -> String;

    /// Exchange an authorization code for a token pair.
    fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
    ) -> impl Future<Output = Result<TokenResponse>>;

    /// Exchange a refresh credential for a new token pair.
    fn refresh_token(
        &self,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenResponse>>;

    /// Fetch one page of the athlete's activities.
    ///
    /// Records are returned undecoded so one malformed activity cannot fail
    /// the whole page; see [`StravaActivitySummary::from_record`].
    fn list_activities(
        &self,
        access_token: &str,
        query: &PageQuery,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>>>;
}

/// Page request for the activities endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page index
    pub page: u32,
    pub per_page: u32,
    /// Only activities after this Unix timestamp
    pub after: Option<i64>,
    /// Only activities before this Unix timestamp
    pub before: Option<i64>,
}

impl PageQuery {
    fn to_params(self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        if let Some(after) = self.after {
            params.push(("after", after.to_string()));
        }
        if let Some(before) = self.before {
            params.push(("before", before.to_string()));
        }
        params
    }
}

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
}

impl Default for StravaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StravaClient {
    /// Create a client against the production endpoints.
    pub fn new() -> Self {
        Self::with_base_urls(STRAVA_API_BASE, STRAVA_OAUTH_BASE)
    }

    /// Create a client against custom endpoints (mock servers in tests).
    pub fn with_base_urls(base_url: impl Into<String>, oauth_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            oauth_url: oauth_url.into(),
        }
    }

    /// POST to the token endpoint. Non-2xx responses become `TokenExchange`.
    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(form)
            .send()
            .await
            .map_err(|e| SyncError::StravaApi(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Strava token exchange failed");
            return Err(SyncError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::StravaApi(format!("Failed to parse token response: {}", e)))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        log_rate_limit_usage(response.headers());

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &body));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::StravaApi(format!("JSON parse error: {}", e)))
    }
}

impl StravaApi for StravaClient {
    fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        state: &str,
    ) -> String {
        format!(
            "{}/authorize?\
             client_id={}&\
             redirect_uri={}&\
             response_type=code&\
             approval_prompt=auto&\
             scope={}&\
             state={}",
            self.oauth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            scope,
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, credentials: &Credentials, code: &str) -> Result<TokenResponse> {
        self.post_token_form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        self.post_token_form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn list_activities(
        &self,
        access_token: &str,
        query: &PageQuery,
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&query.to_params())
            .send()
            .await
            .map_err(|e| SyncError::StravaApi(e.to_string()))?;

        self.check_response_json(response).await
    }
}

/// Map a failed API response onto the error taxonomy.
pub fn classify_failure(status: u16, retry_after: Option<Duration>, body: &str) -> SyncError {
    if status == 429 || is_rate_limit_body(body) {
        tracing::warn!(status, ?retry_after, "Strava rate limit hit");
        return SyncError::RateLimited { retry_after };
    }

    // Unauthorized - token expired or revoked
    if status == 401 {
        return SyncError::Unauthorized;
    }

    SyncError::StravaApi(format!("HTTP {}: {}", status, body))
}

/// Strava sometimes reports throttling only in the JSON body.
fn is_rate_limit_body(body: &str) -> bool {
    #[derive(Deserialize)]
    struct Fault {
        message: Option<String>,
    }

    serde_json::from_str::<Fault>(body)
        .ok()
        .and_then(|f| f.message)
        .is_some_and(|m| m == RATE_LIMIT_MESSAGE)
}

/// `Retry-After` in delta-seconds form. The HTTP-date form is ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn log_rate_limit_usage(headers: &HeaderMap) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let (Some(usage), Some(limit)) = (header("x-ratelimit-usage"), header("x-ratelimit-limit"))
    {
        tracing::debug!(usage, limit, "Strava rate limit usage");
    }
}

/// Token response from Strava OAuth (athlete only present on code exchange).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub athlete: Option<StravaAthlete>,
}

/// Athlete info from OAuth token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthlete {
    pub id: u64,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
}

/// Summary activity for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StravaActivitySummary {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub sport_type: Option<String>,
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    pub start_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distance: f64,
    /// `[lat, lng]`, empty for activities without GPS
    #[serde(default)]
    pub start_latlng: Option<Vec<f64>>,
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl StravaActivitySummary {
    /// Decode one record of an activities page.
    pub fn from_record(record: serde_json::Value) -> Result<Self> {
        let activity_id = record.get("id").and_then(|id| id.as_u64()).unwrap_or(0);
        serde_json::from_value(record).map_err(|e| SyncError::Decode {
            activity_id,
            reason: format!("malformed activity record: {}", e),
        })
    }

    /// Sport type, falling back to the legacy `type` field.
    pub fn sport(&self) -> &str {
        self.sport_type
            .as_deref()
            .or(self.activity_type.as_deref())
            .unwrap_or("Unknown")
    }

    /// Get the detailed polyline, falling back to summary if not available.
    pub fn get_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        [map.polyline.as_deref(), map.summary_polyline.as_deref()]
            .into_iter()
            .flatten()
            .find(|p| !p.is_empty())
    }

    /// Start coordinate as `(lat, lng)`, if reported.
    pub fn start_coords(&self) -> Option<(f64, f64)> {
        match self.start_latlng.as_deref() {
            Some([lat, lng]) => Some((*lat, *lng)),
            _ => None,
        }
    }
}

/// Strava sends `null` for some fields it normally fills in.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Activity map data with polylines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StravaMap {
    #[serde(default)]
    pub polyline: Option<String>,
    #[serde(default)]
    pub summary_polyline: Option<String>,
}
