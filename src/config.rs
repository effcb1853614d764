//! Run configuration loaded from environment variables (and `.env`).
//!
//! Accounts are listed in `STRAVA_ACCOUNTS`; the n-th alias (1-based) takes
//! its credentials from `STRAVA_CLIENT_ID_<n>` / `STRAVA_CLIENT_SECRET_<n>`,
//! falling back to the unsuffixed variables.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::token_store::{DEFAULT_TOKEN_MARGIN_SECS, MIN_TOKEN_MARGIN_SECS};
use crate::models::Account;
use crate::services::aggregator::DEFAULT_CLUSTER_RADIUS_METERS;
use crate::services::auth::{DEFAULT_AUTH_TIMEOUT_SECS, MIN_AUTH_TIMEOUT_SECS};
use crate::services::backoff::BackoffPolicy;
use crate::services::fetcher::{DEFAULT_PER_PAGE, MAX_PER_PAGE};
use crate::time_utils::parse_day_start;

/// Alias used when `STRAVA_ACCOUNTS` is unset.
pub const DEFAULT_ACCOUNT_ALIAS: &str = "Account1";

/// Port Strava redirects to; must match the app's callback domain settings.
pub const DEFAULT_CALLBACK_PORT: u16 = 8000;

/// One configured Strava account.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub alias: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("alias", &self.alias)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Run configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    /// `after` bound for the activity listing (Unix seconds)
    pub from_date: Option<i64>,
    /// `before` bound for the activity listing (Unix seconds)
    pub to_date: Option<i64>,
    pub token_dir: PathBuf,
    pub output_dir: PathBuf,
    pub callback_port: u16,
    pub auth_timeout: Duration,
    pub token_margin: Duration,
    pub per_page: u32,
    pub cluster_radius_km: f64,
    pub rate_limit_max_attempts: u32,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            accounts: vec![AccountConfig {
                alias: DEFAULT_ACCOUNT_ALIAS.to_string(),
                client_id: "test_client_id".to_string(),
                client_secret: "test_secret".to_string(),
            }],
            from_date: None,
            to_date: None,
            token_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            callback_port: DEFAULT_CALLBACK_PORT,
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            token_margin: Duration::from_secs(DEFAULT_TOKEN_MARGIN_SECS as u64),
            per_page: DEFAULT_PER_PAGE,
            cluster_radius_km: DEFAULT_CLUSTER_RADIUS_METERS / 1000.0,
            rate_limit_max_attempts: BackoffPolicy::default().max_attempts,
        }
    }
}

impl Config {
    /// Load configuration from the process environment, after reading `.env`
    /// if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let aliases = match var("STRAVA_ACCOUNTS") {
            Some(list) => parse_aliases(&list)?,
            None => vec![DEFAULT_ACCOUNT_ALIAS.to_string()],
        };

        let mut accounts = Vec::with_capacity(aliases.len());
        for (i, alias) in aliases.into_iter().enumerate() {
            let n = i + 1;
            let client_id = var(&format!("STRAVA_CLIENT_ID_{}", n))
                .or_else(|| var("STRAVA_CLIENT_ID"))
                .ok_or_else(|| ConfigError::Missing(format!("STRAVA_CLIENT_ID_{}", n)))?;
            let client_secret = var(&format!("STRAVA_CLIENT_SECRET_{}", n))
                .or_else(|| var("STRAVA_CLIENT_SECRET"))
                .ok_or_else(|| ConfigError::Missing(format!("STRAVA_CLIENT_SECRET_{}", n)))?;
            accounts.push(AccountConfig {
                alias,
                client_id,
                client_secret,
            });
        }

        let from_date = var("FROM_DATE")
            .map(|v| parse_date("FROM_DATE", &v))
            .transpose()?;
        let to_date = var("TO_DATE").map(|v| parse_date("TO_DATE", &v)).transpose()?;
        if let (Some(from), Some(to)) = (from_date, to_date) {
            if from >= to {
                return Err(ConfigError::Invalid {
                    var: "TO_DATE".to_string(),
                    reason: "must be later than FROM_DATE".to_string(),
                });
            }
        }

        let auth_timeout_secs: u64 = parse_or(
            "AUTH_TIMEOUT_SECS",
            var("AUTH_TIMEOUT_SECS"),
            DEFAULT_AUTH_TIMEOUT_SECS,
        )?;
        if auth_timeout_secs < MIN_AUTH_TIMEOUT_SECS {
            return Err(invalid(
                "AUTH_TIMEOUT_SECS",
                format!("must be at least {}", MIN_AUTH_TIMEOUT_SECS),
            ));
        }

        let token_margin_secs: i64 = parse_or(
            "TOKEN_MARGIN_SECS",
            var("TOKEN_MARGIN_SECS"),
            DEFAULT_TOKEN_MARGIN_SECS,
        )?;
        if token_margin_secs < MIN_TOKEN_MARGIN_SECS {
            return Err(invalid(
                "TOKEN_MARGIN_SECS",
                format!("must be at least {}", MIN_TOKEN_MARGIN_SECS),
            ));
        }

        let per_page: u32 = parse_or("PER_PAGE", var("PER_PAGE"), DEFAULT_PER_PAGE)?;
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(invalid("PER_PAGE", format!("must be between 1 and {}", MAX_PER_PAGE)));
        }

        let cluster_radius_km: f64 = parse_or(
            "CLUSTER_RADIUS_KM",
            var("CLUSTER_RADIUS_KM"),
            DEFAULT_CLUSTER_RADIUS_METERS / 1000.0,
        )?;
        validate_radius(cluster_radius_km)?;

        let rate_limit_max_attempts: u32 = parse_or(
            "RATE_LIMIT_MAX_ATTEMPTS",
            var("RATE_LIMIT_MAX_ATTEMPTS"),
            BackoffPolicy::default().max_attempts,
        )?;
        if rate_limit_max_attempts < BackoffPolicy::MIN_ATTEMPTS {
            return Err(invalid(
                "RATE_LIMIT_MAX_ATTEMPTS",
                format!("must be at least {}", BackoffPolicy::MIN_ATTEMPTS),
            ));
        }

        Ok(Self {
            accounts,
            from_date,
            to_date,
            token_dir: var("TOKEN_DIR").map(PathBuf::from).unwrap_or_else(|| ".".into()),
            output_dir: var("OUTPUT_DIR").map(PathBuf::from).unwrap_or_else(|| ".".into()),
            callback_port: parse_or("CALLBACK_PORT", var("CALLBACK_PORT"), DEFAULT_CALLBACK_PORT)?,
            auth_timeout: Duration::from_secs(auth_timeout_secs),
            token_margin: Duration::from_secs(token_margin_secs as u64),
            per_page,
            cluster_radius_km,
            rate_limit_max_attempts,
        })
    }

    /// Keep only the accounts named in `aliases`, in that order.
    pub fn select_accounts(&mut self, aliases: &[String]) -> Result<(), ConfigError> {
        let mut selected = Vec::with_capacity(aliases.len());
        for alias in aliases {
            let account = self
                .accounts
                .iter()
                .find(|a| &a.alias == alias)
                .ok_or_else(|| ConfigError::UnknownAccount(alias.clone()))?;
            if !selected.iter().any(|a: &AccountConfig| &a.alias == alias) {
                selected.push(account.clone());
            }
        }
        self.accounts = selected;
        Ok(())
    }

    pub fn set_cluster_radius_km(&mut self, radius_km: f64) -> Result<(), ConfigError> {
        validate_radius(radius_km)?;
        self.cluster_radius_km = radius_km;
        Ok(())
    }

    /// Accounts ready for a sync run (no tokens loaded yet).
    pub fn build_accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(&a.alias, &a.client_id, &a.client_secret))
            .collect()
    }
}

/// Split and validate a comma-separated alias list.
fn parse_aliases(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let mut aliases = Vec::new();

    for alias in list.split(',').map(str::trim) {
        if alias.is_empty() {
            return Err(invalid("STRAVA_ACCOUNTS", "empty alias".to_string()));
        }
        if !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidAlias(alias.to_string()));
        }
        if !seen.insert(alias) {
            return Err(ConfigError::DuplicateAlias(alias.to_string()));
        }
        aliases.push(alias.to_string());
    }

    Ok(aliases)
}

fn parse_date(name: &str, value: &str) -> Result<i64, ConfigError> {
    parse_day_start(value).ok_or_else(|| invalid(name, format!("'{}' is not YYYY-MM-DD", value)))
}

fn parse_or<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| invalid(name, format!("'{}' is not a valid value", v))),
        None => Ok(default),
    }
}

fn validate_radius(radius_km: f64) -> Result<(), ConfigError> {
    if radius_km.is_finite() && radius_km > 0.0 {
        Ok(())
    } else {
        Err(invalid("CLUSTER_RADIUS_KM", "must be greater than 0".to_string()))
    }
}

fn invalid(var: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Account alias '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidAlias(String),

    #[error("Account alias '{0}' is listed twice")]
    DuplicateAlias(String),

    #[error("Account '{0}' is not configured")]
    UnknownAccount(String),
}
