// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync error taxonomy.
//!
//! Errors fall into three tiers:
//! - per-activity (`Decode`): the activity is skipped, the account continues
//! - per-account (auth, exhausted rate-limit retries): the account is dropped
//!   from the run, the other accounts continue
//! - run-level (`Io`, `Render`, `Internal`): surfaced to the operator

use std::time::Duration;

/// Error type shared by the token store, auth flow, fetcher and sinks.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Stored token for '{alias}' is unreadable: {reason}")]
    CorruptToken { alias: String, reason: String },

    #[error("No authorization callback received within {}s", .0.as_secs())]
    AuthTimeout(Duration),

    #[error("Authorization denied: {0}")]
    AuthDenied(String),

    #[error("Authorization cancelled by operator")]
    AuthCancelled,

    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("Strava rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Strava rate limit still exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Strava rejected the access token")]
    Unauthorized,

    #[error("Account '{0}' could not be authenticated, re-authorization required")]
    AccountAuth(String),

    #[error("Activity {activity_id} could not be decoded: {reason}")]
    Decode { activity_id: u64, reason: String },

    #[error("Strava API error: {0}")]
    StravaApi(String),

    #[error("Callback listener error: {0}")]
    CallbackServer(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// True for errors that can only be fixed by (re-)authorizing the account.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            SyncError::CorruptToken { .. } | SyncError::Unauthorized | SyncError::AccountAuth(_)
        )
    }

    /// True for errors from the operator side of the browser handshake.
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            SyncError::AuthTimeout(_) | SyncError::AuthDenied(_) | SyncError::AuthCancelled
        )
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
