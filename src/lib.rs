// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava-Multimap: combine the activities of several Strava accounts
//!
//! This crate authorizes each configured account, pulls its complete
//! activity history and merges everything into one model with per-account
//! colors and geographic clusters, ready to be rendered as maps.

pub mod config;
pub mod db;
pub mod error;
pub mod geo_utils;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
