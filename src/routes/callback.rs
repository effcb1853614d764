// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth redirect target served on the loopback interface.
//!
//! The browser lands on `/callback?code=...&state=...` (or `?error=...`) after
//! the operator answers Strava's consent screen. Each hit is forwarded to the
//! waiting auth flow over a channel; the browser gets a small HTML page.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::{Result, SyncError};
use crate::services::auth::{CallbackOutcome, CallbackSource};

pub const CALLBACK_PATH: &str = "/callback";

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization successful! \
                            You can close this window.</h1></body></html>";
const DENIED_PAGE: &str = "<html><body><h1>Authorization denied.</h1></body></html>";
const FAILED_PAGE: &str = "<html><body><h1>Authorization failed!</h1></body></html>";

/// Query parameters Strava appends to the redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

struct CallbackState {
    outcomes: mpsc::Sender<CallbackOutcome>,
}

/// Router forwarding callback hits into `outcomes`.
pub fn routes(outcomes: mpsc::Sender<CallbackOutcome>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(auth_callback))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(Arc::new(CallbackState { outcomes }))
}

async fn auth_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    // Check for OAuth errors
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from Strava");
        forward(
            &state,
            CallbackOutcome::Denied {
                reason: error,
                state: params.state,
            },
        );
        return (StatusCode::OK, Html(DENIED_PAGE));
    }

    match params.code {
        Some(code) if !code.is_empty() => {
            forward(
                &state,
                CallbackOutcome::Code {
                    code,
                    state: params.state,
                },
            );
            (StatusCode::OK, Html(SUCCESS_PAGE))
        }
        _ => {
            tracing::warn!("Callback without code or error, ignoring");
            (StatusCode::BAD_REQUEST, Html(FAILED_PAGE))
        }
    }
}

fn forward(state: &CallbackState, outcome: CallbackOutcome) {
    if let Err(e) = state.outcomes.try_send(outcome) {
        tracing::warn!(error = %e, "No auth flow is waiting for this callback");
    }
}

/// Loopback HTTP listener receiving OAuth redirects.
///
/// Binding is deferred until [`CallbackSource::listen`] so a run whose tokens
/// are all valid never touches the port.
pub struct LocalCallbackServer {
    port: u16,
    running: Option<Running>,
}

struct Running {
    addr: SocketAddr,
    outcomes: mpsc::Receiver<CallbackOutcome>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LocalCallbackServer {
    /// Listener for `127.0.0.1:<port>`. Port 0 picks a free port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            running: None,
        }
    }

    /// Bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    async fn start(&mut self) -> Result<&mut Running> {
        if self.running.is_none() {
            let listener = TcpListener::bind(("127.0.0.1", self.port))
                .await
                .map_err(|e| {
                    SyncError::CallbackServer(format!("cannot bind port {}: {}", self.port, e))
                })?;
            let addr = listener.local_addr()?;

            let (tx, rx) = mpsc::channel(8);
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let app = routes(tx);

            tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Callback listener stopped");
                }
            });

            tracing::info!(address = %addr, "Callback listener started");
            self.running = Some(Running {
                addr,
                outcomes: rx,
                shutdown: Some(shutdown_tx),
            });
        }

        self.running
            .as_mut()
            .ok_or_else(|| SyncError::CallbackServer("listener not running".to_string()))
    }
}

impl CallbackSource for LocalCallbackServer {
    async fn listen(&mut self) -> Result<String> {
        let running = self.start().await?;

        let mut stale = 0usize;
        while running.outcomes.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "Discarded callbacks from an earlier request");
        }

        Ok(format!(
            "http://localhost:{}{}",
            running.addr.port(),
            CALLBACK_PATH
        ))
    }

    async fn next_callback(&mut self) -> Result<CallbackOutcome> {
        let running = self.start().await?;
        running
            .outcomes
            .recv()
            .await
            .ok_or_else(|| SyncError::CallbackServer("callback channel closed".to_string()))
    }
}

impl Drop for LocalCallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.running.as_mut().and_then(|r| r.shutdown.take()) {
            let _ = shutdown.send(());
        }
    }
}
