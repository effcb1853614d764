// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token model as persisted in the per-account token file.

use serde::{Deserialize, Serialize};

/// An account's OAuth2 token pair.
///
/// The owning alias is implied by the file name and is not serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Alias of the owning account
    #[serde(skip)]
    pub alias: String,
    /// Bearer credential for API calls
    pub access_token: String,
    /// Credential for the refresh exchange
    pub refresh_token: String,
    /// Absolute expiry of the access token (Unix seconds)
    pub expires_at: i64,
    /// Strava athlete ID, known after the first authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<u64>,
}

impl Token {
    /// Replace the credentials after a refresh exchange, keeping identity.
    pub fn refreshed(&self, access_token: String, refresh_token: String, expires_at: i64) -> Self {
        Self {
            alias: self.alias.clone(),
            access_token,
            refresh_token,
            expires_at,
            athlete_id: self.athlete_id,
        }
    }
}
