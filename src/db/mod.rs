// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local persistence (token files).

pub mod token_store;

pub use token_store::TokenStore;

/// File naming conventions.
pub mod files {
    /// Token files are `strava_token_<alias>.json`
    pub const TOKEN_FILE_PREFIX: &str = "strava_token_";
}
