// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Multi-account sync run.
//!
//! Accounts are processed one after another. For each account:
//! 1. Obtain a usable token (stored, refreshed, or interactively authorized)
//! 2. Fetch the full activity history
//! 3. Fold the activities into the shared model
//!
//! A failure in steps 1-2 drops that account from the run and is recorded in
//! the report; the remaining accounts are still processed.

use tokio::sync::watch;
use tracing::Instrument;

use crate::db::TokenStore;
use crate::error::SyncError;
use crate::models::{Account, AggregatedModel};
use crate::services::aggregator::{Aggregator, DEFAULT_CLUSTER_RADIUS_METERS};
use crate::services::auth::{AuthFlow, AuthSettings, CallbackSource};
use crate::services::backoff::BackoffPolicy;
use crate::services::fetcher::{ActivityFetcher, FetchOptions, FetchOutcome};
use crate::services::strava::StravaApi;

/// Knobs for a whole run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub auth: AuthSettings,
    pub fetch: FetchOptions,
    pub backoff: BackoffPolicy,
    pub cluster_radius_meters: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            fetch: FetchOptions::default(),
            backoff: BackoffPolicy::default(),
            cluster_radius_meters: DEFAULT_CLUSTER_RADIUS_METERS,
        }
    }
}

/// Counts for an account that synced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountSummary {
    pub fetched: usize,
    pub added: usize,
    pub duplicates: usize,
    /// Activities that could not be decoded
    pub skipped: usize,
    pub pages: u32,
}

/// How one account fared.
#[derive(Debug)]
pub struct AccountOutcome {
    pub alias: String,
    pub result: Result<AccountSummary, SyncError>,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct SyncReport {
    pub model: AggregatedModel,
    /// One entry per account, in processing order
    pub outcomes: Vec<AccountOutcome>,
}

impl SyncReport {
    pub fn synced(&self) -> impl Iterator<Item = (&str, &AccountSummary)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|s| (o.alias.as_str(), s)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &SyncError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.alias.as_str(), e)))
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.result.is_err())
    }
}

/// Drives a run across accounts.
pub struct SyncEngine<A, C> {
    api: A,
    store: TokenStore,
    callbacks: C,
    settings: SyncSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl<A: StravaApi, C: CallbackSource> SyncEngine<A, C> {
    pub fn new(api: A, store: TokenStore, callbacks: C, settings: SyncSettings) -> Self {
        Self {
            api,
            store,
            callbacks,
            settings,
            cancel: None,
        }
    }

    /// Abort pending authorizations (and skip remaining accounts) once the
    /// receiver observes `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Sync every account and build the combined model.
    ///
    /// Tokens obtained along the way are written back to `accounts`.
    pub async fn run(&mut self, accounts: &mut [Account]) -> SyncReport {
        let mut aggregator = Aggregator::new(self.settings.cluster_radius_meters);
        let mut outcomes = Vec::with_capacity(accounts.len());

        tracing::info!(accounts = accounts.len(), "Starting sync run");

        for account in accounts.iter_mut() {
            let alias = account.alias.clone();
            aggregator.register_account(&alias);

            if self.is_cancelled() {
                tracing::warn!(alias = %alias, "Run cancelled, skipping account");
                outcomes.push(AccountOutcome {
                    alias,
                    result: Err(SyncError::AuthCancelled),
                });
                continue;
            }

            let span = tracing::info_span!("account", alias = %alias);
            let result = match self.sync_account(account).instrument(span).await {
                Ok(fetched) => {
                    let summary = AccountSummary {
                        fetched: fetched.activities.len(),
                        skipped: fetched.skipped.len(),
                        pages: fetched.pages,
                        ..Default::default()
                    };
                    let fold = aggregator.fold_account(&alias, fetched.activities);
                    Ok(AccountSummary {
                        added: fold.added,
                        duplicates: fold.duplicates,
                        ..summary
                    })
                }
                Err(e) => {
                    tracing::error!(alias = %alias, error = %e, "Account sync failed");
                    Err(e)
                }
            };

            outcomes.push(AccountOutcome { alias, result });
        }

        let model = aggregator.finish();
        tracing::info!(
            activities = model.activities.len(),
            clusters = model.clusters.len(),
            "Sync run complete"
        );
        SyncReport { model, outcomes }
    }

    async fn sync_account(&mut self, account: &mut Account) -> crate::error::Result<FetchOutcome> {
        let mut flow = AuthFlow::new(
            &self.api,
            &self.store,
            &mut self.callbacks,
            &self.settings.auth,
        );
        if let Some(cancel) = &self.cancel {
            flow = flow.with_cancel(cancel.clone());
        }

        let token = flow.ensure_token(account).await?;
        account.token = Some(token);

        let fetcher = ActivityFetcher::new(&self.api, self.settings.fetch, self.settings.backoff);
        fetcher.fetch_all(account, &mut flow).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
