// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! File-backed token store.
//!
//! One JSON file per account alias. Writes go to a sibling temp file which is
//! flushed and renamed over the target, then the directory entry itself is
//! flushed, so a crash leaves either the old token or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;

use crate::db::files;
use crate::error::{Result, SyncError};
use crate::models::Token;
use crate::time_utils::{Clock, SystemClock};

/// Default margin before expiry at which a token is treated as stale (5 minutes).
pub const DEFAULT_TOKEN_MARGIN_SECS: i64 = 5 * 60;

/// Smallest margin accepted; below this a token may expire mid-request.
pub const MIN_TOKEN_MARGIN_SECS: i64 = 60;

/// Persists and loads per-account OAuth tokens.
#[derive(Clone)]
pub struct TokenStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    margin: Duration,
}

impl TokenStore {
    /// Create a store rooted at `dir`, using the wall clock and the default margin.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            clock: Arc::new(SystemClock),
            margin: Duration::seconds(DEFAULT_TOKEN_MARGIN_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the expiry margin, clamped to at least [`MIN_TOKEN_MARGIN_SECS`].
    pub fn with_margin(mut self, margin: std::time::Duration) -> Self {
        let secs = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        self.margin = Duration::seconds(secs.max(MIN_TOKEN_MARGIN_SECS));
        self
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Path of the token file for an account.
    pub fn path_for(&self, alias: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", files::TOKEN_FILE_PREFIX, alias))
    }

    /// Load the stored token for an account.
    ///
    /// Returns `Ok(None)` if no token has been stored yet and
    /// `Err(SyncError::CorruptToken)` if the file exists but cannot be parsed.
    pub fn load(&self, alias: &str) -> Result<Option<Token>> {
        let path = self.path_for(alias);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Io(e)),
        };

        let mut token: Token =
            serde_json::from_str(&data).map_err(|e| SyncError::CorruptToken {
                alias: alias.to_string(),
                reason: e.to_string(),
            })?;
        if token.access_token.is_empty() {
            return Err(SyncError::CorruptToken {
                alias: alias.to_string(),
                reason: "empty access token".to_string(),
            });
        }

        token.alias = alias.to_string();
        tracing::debug!(alias, path = %path.display(), "Loaded stored token");
        Ok(Some(token))
    }

    /// Atomically persist a token under its alias.
    pub fn save(&self, token: &Token) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&token.alias);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(token)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("Token serialization: {}", e)))?;

        write_private(&tmp, &data)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(SyncError::Io(e));
        }
        sync_dir(&self.dir)?;

        tracing::debug!(alias = %token.alias, path = %path.display(), "Token saved");
        Ok(())
    }

    /// True iff the current time is strictly before `expires_at - margin`.
    pub fn is_valid(&self, token: &Token) -> bool {
        let now = self.clock.now().timestamp();
        now < token.expires_at - self.margin.num_seconds()
    }
}

/// Write and fsync a file readable only by the current user.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Flush a directory so a rename inside it survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
