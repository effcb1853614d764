// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava-Multimap CLI
//!
//! Syncs every configured Strava account, then writes combined route,
//! heatmap and per-location GeoJSON maps.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use strava_multimap::{
    config::Config,
    db::TokenStore,
    routes::LocalCallbackServer,
    services::{
        strava::DEFAULT_SCOPE, AuthSettings, BackoffPolicy, FetchOptions, GeoJsonSink, RenderSink,
        StravaClient, SyncEngine, SyncReport, SyncSettings,
    },
    time_utils::SystemClock,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "strava-multimap")]
#[command(about = "Combine activities from several Strava accounts into maps", long_about = None)]
struct Cli {
    /// Only sync this account alias (repeatable)
    #[arg(short, long = "account")]
    accounts: Vec<String>,

    /// Directory holding strava_token_<alias>.json files
    #[arg(long)]
    token_dir: Option<PathBuf>,

    /// Directory the maps are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Start points closer than this share a location cluster
    #[arg(long)]
    cluster_radius_km: Option<f64>,

    /// Only print the authorization URL
    #[arg(long)]
    no_browser: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Load configuration from environment, then apply CLI overrides
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if !cli.accounts.is_empty() {
        config.select_accounts(&cli.accounts)?;
    }
    if let Some(dir) = cli.token_dir {
        config.token_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(radius) = cli.cluster_radius_km {
        config.set_cluster_radius_km(radius)?;
    }

    let aliases: Vec<_> = config.accounts.iter().map(|a| a.alias.as_str()).collect();
    tracing::info!(accounts = ?aliases, "Starting Strava-Multimap");

    let sink = GeoJsonSink::for_run(&config.output_dir, &SystemClock);
    let store = TokenStore::new(&config.token_dir).with_margin(config.token_margin);
    let settings = SyncSettings {
        auth: AuthSettings {
            timeout: config.auth_timeout,
            scope: DEFAULT_SCOPE.to_string(),
            open_browser: !cli.no_browser,
        },
        fetch: FetchOptions {
            per_page: config.per_page,
            after: config.from_date,
            before: config.to_date,
        },
        backoff: BackoffPolicy {
            max_attempts: config.rate_limit_max_attempts,
            ..BackoffPolicy::default()
        },
        cluster_radius_meters: config.cluster_radius_km * 1000.0,
    };

    // Ctrl-C aborts a pending authorization instead of killing the run
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling remaining accounts");
            let _ = cancel_tx.send(true);
        }
    });

    let mut engine = SyncEngine::new(
        StravaClient::new(),
        store,
        LocalCallbackServer::new(config.callback_port),
        settings,
    )
    .with_cancel(cancel_rx);

    let mut accounts = config.build_accounts();
    let report = engine.run(&mut accounts).await;
    drop(engine);

    log_summary(&report);

    let artifacts = sink
        .render(&report.model)
        .context("Failed to write maps")?;
    for path in artifacts.all_paths() {
        tracing::info!(path = %path.display(), "Map written");
    }

    if report.all_failed() {
        anyhow::bail!("No account could be synced");
    }
    Ok(())
}

fn log_summary(report: &SyncReport) {
    for (alias, summary) in report.synced() {
        let stats = report.model.stats.get(alias).cloned().unwrap_or_default();
        tracing::info!(
            alias,
            fetched = summary.fetched,
            skipped = summary.skipped,
            runs = stats.runs,
            walks = stats.walks,
            rides = stats.rides,
            total = stats.total,
            distance_km = (stats.distance_meters / 1000.0).round(),
            color = report.model.color_of(alias).unwrap_or_default(),
            "Account synced"
        );
    }
    for (alias, error) in report.failed() {
        tracing::error!(alias, error = %error, "Account not synced");
    }
}

/// Initialize logging: human-readable by default, JSON lines on request.
fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("strava_multimap=debug,info")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
