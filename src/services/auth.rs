// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth authorization flow for one account.
//!
//! Token lifecycle:
//! 1. Stored token still valid: use it
//! 2. Stored token stale: refresh exchange (no operator interaction)
//! 3. No token, corrupt token, or refresh rejected: interactive
//!    authorization-code flow through the loopback callback listener

use std::future::Future;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::watch;

use crate::db::TokenStore;
use crate::error::{Result, SyncError};
use crate::models::{Account, Token};
use crate::services::strava::{StravaApi, TokenResponse, DEFAULT_SCOPE};

/// Default wait for the operator to finish the browser consent (3 minutes).
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 180;

/// Shortest wait accepted from configuration.
pub const MIN_AUTH_TIMEOUT_SECS: u64 = 120;

/// What the browser redirect carried back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Consent granted
    Code { code: String, state: Option<String> },
    /// Consent refused (`error=access_denied`)
    Denied {
        reason: String,
        state: Option<String>,
    },
}

/// Source of OAuth redirect callbacks.
///
/// The real implementation is the loopback HTTP listener; tests script the
/// outcomes directly.
pub trait CallbackSource {
    /// Start accepting callbacks and return the redirect URI to register.
    ///
    /// Callbacks that arrived before this call belong to an earlier request
    /// and are discarded.
    fn listen(&mut self) -> impl Future<Output = Result<String>>;

    /// Wait for the next callback hit.
    fn next_callback(&mut self) -> impl Future<Output = Result<CallbackOutcome>>;
}

/// Something that can produce a fresh token after Strava rejected one.
pub trait TokenRefresher {
    fn refresh_after_rejection(
        &mut self,
        account: &Account,
        stale: &Token,
    ) -> impl Future<Output = Result<Token>>;
}

/// Tunables for the interactive flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub timeout: Duration,
    pub scope: String,
    /// Try to launch the system browser on the authorization URL
    pub open_browser: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            scope: DEFAULT_SCOPE.to_string(),
            open_browser: true,
        }
    }
}

/// Drives token acquisition for accounts.
pub struct AuthFlow<'a, A, C> {
    api: &'a A,
    store: &'a TokenStore,
    callbacks: &'a mut C,
    settings: &'a AuthSettings,
    /// Flips to `true` when the operator aborts the run
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, A: StravaApi, C: CallbackSource> AuthFlow<'a, A, C> {
    pub fn new(
        api: &'a A,
        store: &'a TokenStore,
        callbacks: &'a mut C,
        settings: &'a AuthSettings,
    ) -> Self {
        Self {
            api,
            store,
            callbacks,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Return a usable token for `account`, refreshing or re-authorizing as needed.
    pub async fn ensure_token(&mut self, account: &Account) -> Result<Token> {
        let alias = account.alias.as_str();

        match self.store.load(alias) {
            Ok(Some(token)) if self.store.is_valid(&token) => {
                tracing::info!(alias, athlete_id = ?token.athlete_id, "Reusing stored token");
                return Ok(token);
            }
            Ok(Some(token)) => {
                tracing::info!(alias, "Access token expired, refreshing");
                match self.refresh(account, &token).await {
                    Ok(fresh) => return Ok(fresh),
                    Err(e) => {
                        tracing::warn!(
                            alias,
                            error = %e,
                            "Refresh failed, starting full authorization"
                        );
                    }
                }
            }
            Ok(None) => {
                tracing::info!(alias, "No stored token, authorization required");
            }
            Err(e @ SyncError::CorruptToken { .. }) => {
                tracing::warn!(alias, error = %e, "Ignoring unreadable token file");
            }
            Err(e) => return Err(e),
        }

        self.authorize(account).await
    }

    /// Refresh exchange for a stale token. Persists the new token.
    pub async fn refresh(&mut self, account: &Account, stale: &Token) -> Result<Token> {
        if stale.refresh_token.is_empty() {
            return Err(SyncError::AccountAuth(account.alias.clone()));
        }

        let response = self
            .api
            .refresh_token(&account.credentials, &stale.refresh_token)
            .await?;

        let mut fresh = stale.refreshed(
            response.access_token,
            response.refresh_token,
            response.expires_at,
        );
        fresh.alias = account.alias.clone();
        if let Some(athlete) = response.athlete {
            fresh.athlete_id = Some(athlete.id);
        }

        self.store.save(&fresh)?;
        tracing::info!(alias = %account.alias, athlete_id = ?fresh.athlete_id, "Token refreshed");
        Ok(fresh)
    }

    /// Full interactive authorization-code flow.
    pub async fn authorize(&mut self, account: &Account) -> Result<Token> {
        let alias = account.alias.as_str();
        let redirect_uri = self.callbacks.listen().await?;
        let state = new_state_nonce()?;
        let url = self.api.authorize_url(
            &account.credentials.client_id,
            &redirect_uri,
            &self.settings.scope,
            &state,
        );

        tracing::info!(
            alias,
            url = %url,
            "Strava login required: sign in with this account's browser profile and open the URL"
        );
        if self.settings.open_browser {
            open_in_browser(&url);
        }

        tracing::info!(
            alias,
            timeout_secs = self.settings.timeout.as_secs(),
            "Waiting for authorization"
        );
        let code = self.await_code(&state).await?;

        tracing::info!(alias, "Exchanging authorization code for tokens");
        let response = self.api.exchange_code(&account.credentials, &code).await?;
        let token = token_from_response(alias, response);
        self.store.save(&token)?;

        tracing::info!(alias, athlete_id = ?token.athlete_id, "Account authorized, token stored");
        Ok(token)
    }

    /// Wait for a callback carrying `expected_state`, bounded by the timeout
    /// and the cancel signal.
    async fn await_code(&mut self, expected_state: &str) -> Result<String> {
        let timeout = self.settings.timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Err(SyncError::AuthTimeout(timeout)),
                _ = cancelled(&mut self.cancel) => return Err(SyncError::AuthCancelled),
                outcome = self.callbacks.next_callback() => match outcome? {
                    CallbackOutcome::Code { code, state }
                        if state.as_deref() == Some(expected_state) =>
                    {
                        return Ok(code);
                    }
                    CallbackOutcome::Denied { reason, state }
                        if state.as_deref() == Some(expected_state) =>
                    {
                        return Err(SyncError::AuthDenied(reason));
                    }
                    CallbackOutcome::Code { .. } | CallbackOutcome::Denied { .. } => {
                        tracing::warn!("Callback state does not match, ignoring");
                    }
                },
            }
        }
    }
}

impl<A: StravaApi, C: CallbackSource> TokenRefresher for AuthFlow<'_, A, C> {
    /// Strava rejected a token mid-fetch: refresh, or re-authorize if the
    /// refresh credential is no longer accepted.
    async fn refresh_after_rejection(&mut self, account: &Account, stale: &Token) -> Result<Token> {
        match self.refresh(account, stale).await {
            Ok(token) => Ok(token),
            Err(e) => {
                tracing::warn!(
                    alias = %account.alias,
                    error = %e,
                    "Refresh rejected, re-authorizing"
                );
                self.authorize(account).await
            }
        }
    }
}

/// Build a token from a code exchange response.
pub fn token_from_response(alias: &str, response: TokenResponse) -> Token {
    Token {
        alias: alias.to_string(),
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at: response.expires_at,
        athlete_id: response.athlete.map(|a| a.id),
    }
}

/// Random, URL-safe `state` parameter binding a callback to its request.
pub fn new_state_nonce() -> Result<String> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| SyncError::Internal(anyhow::anyhow!("System RNG unavailable")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Resolves once the cancel flag is set; never resolves without a signal.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|flag| *flag).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Best effort: the URL is also logged, so failure here is harmless.
fn open_in_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        std::process::Command::new("xdg-open")
    };

    if let Err(e) = command
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        tracing::debug!(error = %e, "Could not launch a browser");
    }
}
