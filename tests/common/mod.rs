// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use strava_multimap::error::{Result, SyncError};
use strava_multimap::models::{Account, Credentials, Token};
use strava_multimap::services::auth::{CallbackOutcome, CallbackSource, TokenRefresher};
use strava_multimap::services::strava::{
    PageQuery, StravaActivitySummary, StravaApi, TokenResponse,
};
use tempfile::TempDir;
use tokio::time::Instant;

/// "Now" for tests using a fixed clock (2023-11-14T22:13:20Z).
pub const NOW: i64 = 1_700_000_000;

/// Redirect URI handed out by [`ScriptedCallbacks`].
pub const TEST_REDIRECT_URI: &str = "http://localhost:8000/callback";

/// One recorded activity listing request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub access_token: String,
    pub query: PageQuery,
    pub at: Instant,
}

/// Scripted stand-in for the Strava API.
///
/// Activity pages are queued per access token; once a token's queue is empty
/// every further page is empty. Token exchanges and refreshes pop their own
/// queues and fail with a 400 when nothing is queued.
#[derive(Default)]
pub struct FakeStrava {
    pages: Mutex<HashMap<String, VecDeque<Result<Vec<Value>>>>>,
    exchanges: Mutex<VecDeque<Result<TokenResponse>>>,
    refreshes: Mutex<VecDeque<Result<TokenResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    exchanged_codes: Mutex<Vec<String>>,
    refreshed_with: Mutex<Vec<String>>,
    issued_state: Arc<Mutex<Option<String>>>,
}

impl FakeStrava {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, access_token: &str, page: Vec<StravaActivitySummary>) {
        let records = page
            .iter()
            .map(|summary| serde_json::to_value(summary).expect("serializable summary"))
            .collect();
        self.enqueue(access_token, Ok(records));
    }

    /// Queue a page of raw records exactly as Strava might send them.
    pub fn push_raw_page(&self, access_token: &str, records: Vec<Value>) {
        self.enqueue(access_token, Ok(records));
    }

    pub fn push_error(&self, access_token: &str, error: SyncError) {
        self.enqueue(access_token, Err(error));
    }

    pub fn push_exchange(&self, response: Result<TokenResponse>) {
        self.exchanges.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<TokenResponse>) {
        self.refreshes.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn exchanged_codes(&self) -> Vec<String> {
        self.exchanged_codes.lock().unwrap().clone()
    }

    pub fn refreshed_with(&self) -> Vec<String> {
        self.refreshed_with.lock().unwrap().clone()
    }

    /// Shared slot holding the `state` of the last authorization URL.
    pub fn state_log(&self) -> Arc<Mutex<Option<String>>> {
        Arc::clone(&self.issued_state)
    }

    fn enqueue(&self, access_token: &str, item: Result<Vec<Value>>) {
        self.pages
            .lock()
            .unwrap()
            .entry(access_token.to_string())
            .or_default()
            .push_back(item);
    }
}

impl StravaApi for FakeStrava {
    fn authorize_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        state: &str,
    ) -> String {
        *self.issued_state.lock().unwrap() = Some(state.to_string());
        format!(
            "https://strava.test/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            client_id, redirect_uri, scope, state
        )
    }

    async fn exchange_code(&self, _credentials: &Credentials, code: &str) -> Result<TokenResponse> {
        self.exchanged_codes.lock().unwrap().push(code.to_string());
        self.exchanges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unexpected("exchange")))
    }

    async fn refresh_token(
        &self,
        _credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        self.refreshed_with
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unexpected("refresh")))
    }

    async fn list_activities(
        &self,
        access_token: &str,
        query: &PageQuery,
    ) -> Result<Vec<Value>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            access_token: access_token.to_string(),
            query: *query,
            at: Instant::now(),
        });
        self.pages
            .lock()
            .unwrap()
            .get_mut(access_token)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn unexpected(what: &str) -> SyncError {
    SyncError::TokenExchange {
        status: 400,
        body: format!("no scripted {} response", what),
    }
}

/// What the next browser redirect should carry.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Consent granted, echoing the state of the last authorization URL
    Code(String),
    /// Consent granted, but with a state from some other request
    WrongState(String),
    /// `error=access_denied` for the last authorization URL
    Denied,
    /// `error=access_denied` left over from some other request
    StaleDenied,
    /// Nobody ever comes back
    Hang,
}

/// Scripted callback source.
pub struct ScriptedCallbacks {
    replies: VecDeque<Reply>,
    issued_state: Arc<Mutex<Option<String>>>,
    listens: usize,
}

impl ScriptedCallbacks {
    pub fn new(fake: &FakeStrava, replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            issued_state: fake.state_log(),
            listens: 0,
        }
    }

    /// Callbacks that never arrive.
    pub fn none(fake: &FakeStrava) -> Self {
        Self::new(fake, [])
    }

    pub fn listen_count(&self) -> usize {
        self.listens
    }
}

impl CallbackSource for ScriptedCallbacks {
    async fn listen(&mut self) -> Result<String> {
        self.listens += 1;
        Ok(TEST_REDIRECT_URI.to_string())
    }

    async fn next_callback(&mut self) -> Result<CallbackOutcome> {
        match self.replies.pop_front() {
            Some(Reply::Code(code)) => Ok(CallbackOutcome::Code {
                code,
                state: self.issued_state.lock().unwrap().clone(),
            }),
            Some(Reply::WrongState(code)) => Ok(CallbackOutcome::Code {
                code,
                state: Some("not-the-issued-state".to_string()),
            }),
            Some(Reply::Denied) => Ok(CallbackOutcome::Denied {
                reason: "access_denied".to_string(),
                state: self.issued_state.lock().unwrap().clone(),
            }),
            Some(Reply::StaleDenied) => Ok(CallbackOutcome::Denied {
                reason: "access_denied".to_string(),
                state: Some("not-the-issued-state".to_string()),
            }),
            Some(Reply::Hang) | None => std::future::pending().await,
        }
    }
}

/// Fresh, empty directory removed when the guard drops.
pub fn scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("strava-multimap-")
        .tempdir()
        .expect("create scratch dir")
}

/// Activity summary starting at `(lat, lng)` with a short route heading north.
pub fn summary_at(id: u64, lat: f64, lng: f64) -> StravaActivitySummary {
    let route = vec![
        geo::Coord { x: lng, y: lat },
        geo::Coord {
            x: lng,
            y: lat + 0.01,
        },
        geo::Coord {
            x: lng + 0.01,
            y: lat + 0.01,
        },
    ];
    let encoded = polyline::encode_coordinates(route, 5).expect("encode polyline");

    serde_json::from_value(json!({
        "id": id,
        "name": format!("Activity {}", id),
        "sport_type": "Run",
        "start_date": "2024-01-15T10:30:00Z",
        "distance": 5000.0,
        "start_latlng": [lat, lng],
        "map": { "summary_polyline": encoded },
    }))
    .expect("valid summary")
}

/// Activity summary whose polyline cannot be decoded.
pub fn broken_summary(id: u64) -> StravaActivitySummary {
    serde_json::from_value(json!({
        "id": id,
        "name": "Broken",
        "type": "Run",
        "start_date": "2024-01-15T10:30:00Z",
        "map": { "summary_polyline": "!!!!" },
    }))
    .expect("valid summary")
}

/// `count` activities with consecutive IDs from `first_id`, all near Zurich.
pub fn page_of(first_id: u64, count: usize) -> Vec<StravaActivitySummary> {
    (0..count as u64)
        .map(|i| summary_at(first_id + i, 47.37, 8.54))
        .collect()
}

pub fn token_response(access: &str, refresh: &str, expires_at: i64) -> TokenResponse {
    serde_json::from_value(json!({
        "token_type": "Bearer",
        "access_token": access,
        "refresh_token": refresh,
        "expires_at": expires_at,
    }))
    .expect("valid token response")
}

pub fn token_response_with_athlete(
    access: &str,
    refresh: &str,
    expires_at: i64,
    athlete_id: u64,
) -> TokenResponse {
    serde_json::from_value(json!({
        "token_type": "Bearer",
        "access_token": access,
        "refresh_token": refresh,
        "expires_at": expires_at,
        "athlete": { "id": athlete_id, "firstname": "Test", "lastname": "Athlete" },
    }))
    .expect("valid token response")
}

pub fn token(alias: &str, access: &str, expires_at: i64) -> Token {
    Token {
        alias: alias.to_string(),
        access_token: access.to_string(),
        refresh_token: format!("{}-refresh", access),
        expires_at,
        athlete_id: None,
    }
}

/// Account `alias` already holding an access token.
pub fn account_with_token(alias: &str, access: &str) -> Account {
    let mut account = Account::new(alias, format!("{}-client", alias), "secret");
    account.token = Some(token(alias, access, NOW + 3600));
    account
}

/// Refresher handing out at most one prepared token.
#[derive(Default)]
pub struct StubRefresher {
    pub next: Option<Token>,
    pub calls: usize,
}

impl StubRefresher {
    pub fn with(token: Token) -> Self {
        Self {
            next: Some(token),
            calls: 0,
        }
    }
}

impl TokenRefresher for StubRefresher {
    async fn refresh_after_rejection(
        &mut self,
        account: &Account,
        _stale: &Token,
    ) -> Result<Token> {
        self.calls += 1;
        self.next
            .take()
            .ok_or_else(|| SyncError::AccountAuth(account.alias.clone()))
    }
}
