// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token lifecycle tests: reuse, refresh, interactive authorization, and the
//! ways the browser handshake can fail.

use std::sync::Arc;
use std::time::Duration;

use strava_multimap::db::TokenStore;
use strava_multimap::error::SyncError;
use strava_multimap::models::Account;
use strava_multimap::routes::LocalCallbackServer;
use strava_multimap::services::{AuthFlow, AuthSettings, CallbackSource, TokenRefresher};
use strava_multimap::time_utils::FixedClock;
use tempfile::TempDir;
use tokio::sync::watch;

mod common;

use common::{
    scratch_dir, token, token_response, token_response_with_athlete, FakeStrava, Reply,
    ScriptedCallbacks, NOW,
};

/// Store in a scratch directory; keep the guard alive for the test.
fn store() -> (TempDir, TokenStore) {
    let dir = scratch_dir();
    let store = TokenStore::new(dir.path()).with_clock(Arc::new(FixedClock::at_timestamp(NOW)));
    (dir, store)
}

fn settings() -> AuthSettings {
    AuthSettings {
        timeout: Duration::from_secs(120),
        open_browser: false,
        ..AuthSettings::default()
    }
}

fn account() -> Account {
    Account::new("m", "client-m", "secret-m")
}

#[tokio::test]
async fn test_valid_stored_token_is_reused() {
    let fake = FakeStrava::new();
    let (_dir, store) = store();
    store.save(&token("m", "stored", NOW + 3600)).unwrap();
    let mut callbacks = ScriptedCallbacks::none(&fake);
    let settings = settings();

    let token = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(token.access_token, "stored");
    assert!(fake.refreshed_with().is_empty());
    assert_eq!(callbacks.listen_count(), 0);
}

#[tokio::test]
async fn test_stale_token_is_refreshed_and_persisted() {
    let fake = FakeStrava::new();
    fake.push_refresh(Ok(token_response("fresh", "fresh-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let mut stale = token("m", "stale", NOW + 100);
    stale.athlete_id = Some(42);
    store.save(&stale).unwrap();
    let mut callbacks = ScriptedCallbacks::none(&fake);
    let settings = settings();

    let token = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(token.access_token, "fresh");
    assert_eq!(fake.refreshed_with(), vec!["stale-refresh".to_string()]);
    assert_eq!(callbacks.listen_count(), 0);

    // Persisted, with the athlete carried over from the old token
    let saved = store.load("m").unwrap().unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token, "fresh-refresh");
    assert_eq!(saved.athlete_id, Some(42));
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_authorization() {
    let fake = FakeStrava::new();
    fake.push_refresh(Err(SyncError::TokenExchange {
        status: 400,
        body: r#"{"message":"Bad Request"}"#.to_string(),
    }));
    fake.push_exchange(Ok(token_response_with_athlete(
        "new",
        "new-refresh",
        NOW + 21_600,
        7,
    )));
    let (_dir, store) = store();
    store.save(&token("m", "stale", NOW - 10)).unwrap();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Code("code-1".to_string())]);
    let settings = settings();

    let token = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(token.access_token, "new");
    assert_eq!(token.athlete_id, Some(7));
    assert_eq!(fake.exchanged_codes(), vec!["code-1".to_string()]);
    assert_eq!(callbacks.listen_count(), 1);
}

#[tokio::test]
async fn test_missing_token_runs_authorization() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response_with_athlete(
        "new",
        "new-refresh",
        NOW + 21_600,
        7,
    )));
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Code("abc".to_string())]);
    let settings = settings();

    AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    let saved = store.load("m").unwrap().unwrap();
    assert_eq!(saved.access_token, "new");
    assert_eq!(saved.athlete_id, Some(7));
    assert!(store.path_for("m").ends_with("strava_token_m.json"));
}

#[tokio::test]
async fn test_corrupt_token_file_runs_authorization() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response("new", "new-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    std::fs::write(store.path_for("m"), "{ not json").unwrap();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Code("abc".to_string())]);
    let settings = settings();

    let token = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(token.access_token, "new");
    assert_eq!(store.load("m").unwrap().unwrap().access_token, "new");
}

#[tokio::test]
async fn test_denied_consent_fails_without_exchange() {
    let fake = FakeStrava::new();
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Denied]);
    let settings = settings();

    let err = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthDenied(ref reason) if reason == "access_denied"));
    assert!(err.is_operator_error());
    assert!(fake.exchanged_codes().is_empty());
    assert!(store.load("m").unwrap().is_none());
}

#[tokio::test]
async fn test_callback_with_foreign_state_is_ignored() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response("new", "new-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(
        &fake,
        [
            Reply::WrongState("forged".to_string()),
            Reply::Code("genuine".to_string()),
        ],
    );
    let settings = settings();

    AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(fake.exchanged_codes(), vec!["genuine".to_string()]);
}

#[tokio::test]
async fn test_refusal_with_foreign_state_is_ignored() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response("new", "new-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(
        &fake,
        [Reply::StaleDenied, Reply::Code("genuine".to_string())],
    );
    let settings = settings();

    let token = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap();

    assert_eq!(token.access_token, "new");
    assert_eq!(fake.exchanged_codes(), vec!["genuine".to_string()]);
}

/// Play the operator's browser: wait for a new authorization URL, send a
/// stray refusal for another request, then answer with `code`.
async fn answer_in_browser(fake: &FakeStrava, port: u16, code: &str) {
    let issued = fake.state_log();
    let state = loop {
        let taken = issued.lock().unwrap().take();
        if let Some(state) = taken {
            break state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let callback = |query: String| {
        reqwest::get(format!("http://127.0.0.1:{}/callback?{}", port, query))
    };
    callback("error=access_denied&state=someone-else".to_string())
        .await
        .unwrap();
    callback(format!("code={}&state={}", code, state))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sequential_authorizations_share_one_listener() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response("m-new", "m-refresh", NOW + 21_600)));
    fake.push_exchange(Ok(token_response("a-new", "a-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let settings = settings();

    let mut server = LocalCallbackServer::new(0);
    server.listen().await.unwrap();
    let port = server.local_addr().unwrap().port();

    // Refusals left over from before either account asked
    for _ in 0..2 {
        reqwest::get(format!(
            "http://127.0.0.1:{}/callback?error=access_denied&state=whatever",
            port
        ))
        .await
        .unwrap();
    }

    let m = Account::new("m", "client-m", "secret-m");
    let a = Account::new("a", "client-a", "secret-a");
    let mut flow = AuthFlow::new(&fake, &store, &mut server, &settings);

    let (m_token, ()) = tokio::join!(flow.authorize(&m), answer_in_browser(&fake, port, "code-m"));
    assert_eq!(m_token.unwrap().access_token, "m-new");

    let (a_token, ()) = tokio::join!(flow.authorize(&a), answer_in_browser(&fake, port, "code-a"));
    assert_eq!(a_token.unwrap().access_token, "a-new");

    assert_eq!(
        fake.exchanged_codes(),
        vec!["code-m".to_string(), "code-a".to_string()]
    );
    assert_eq!(store.load("a").unwrap().unwrap().access_token, "a-new");
}

#[tokio::test(start_paused = true)]
async fn test_no_callback_times_out() {
    let fake = FakeStrava::new();
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Hang]);
    let settings = settings();

    let started = tokio::time::Instant::now();
    let err = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .ensure_token(&account())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthTimeout(t) if t == Duration::from_secs(120)));
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert!(store.load("m").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_the_wait() {
    let fake = FakeStrava::new();
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Hang]);
    let settings = settings();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let _ = cancel_tx.send(true);
    });

    let started = tokio::time::Instant::now();
    let err = AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .with_cancel(cancel_rx)
        .ensure_token(&account())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthCancelled));
    assert!(started.elapsed() < Duration::from_secs(120));
}

#[tokio::test]
async fn test_refresh_after_rejection_uses_refresh_credential() {
    let fake = FakeStrava::new();
    fake.push_refresh(Ok(token_response("fresh", "fresh-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::none(&fake);
    let settings = settings();

    let rejected = token("m", "rejected", NOW + 3600);
    let mut flow = AuthFlow::new(&fake, &store, &mut callbacks, &settings);
    let token = flow
        .refresh_after_rejection(&account(), &rejected)
        .await
        .unwrap();

    assert_eq!(token.access_token, "fresh");
    assert_eq!(fake.refreshed_with(), vec!["rejected-refresh".to_string()]);
}

#[tokio::test]
async fn test_authorization_issues_url_safe_state() {
    let fake = FakeStrava::new();
    fake.push_exchange(Ok(token_response("new", "new-refresh", NOW + 21_600)));
    let (_dir, store) = store();
    let mut callbacks = ScriptedCallbacks::new(&fake, [Reply::Code("abc".to_string())]);
    let settings = settings();

    AuthFlow::new(&fake, &store, &mut callbacks, &settings)
        .authorize(&account())
        .await
        .unwrap();

    let state = fake.state_log().lock().unwrap().clone().unwrap();
    assert_eq!(state.len(), 22);
}
