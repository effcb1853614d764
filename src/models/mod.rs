// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the sync engine.

pub mod account;
pub mod activity;
pub mod aggregate;
pub mod token;

pub use account::{Account, Credentials};
pub use activity::{Activity, ActivityKey, ActivityKind};
pub use aggregate::{AccountColor, AccountStats, AggregatedModel, GeoCluster};
pub use token::Token;
