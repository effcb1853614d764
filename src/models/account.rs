// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Configured Strava account.

use crate::models::Token;

/// Strava API application credentials. One app is bound to one athlete.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// One account taking part in the run.
#[derive(Debug, Clone)]
pub struct Account {
    /// Short operator-chosen name ("m", "a", ...)
    pub alias: String,
    pub credentials: Credentials,
    /// Token currently in use, set once the account is authenticated
    pub token: Option<Token>,
}

impl Account {
    pub fn new(
        alias: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            credentials: Credentials {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
            },
            token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let account = Account::new("m", "12345", "super-secret");
        let rendered = format!("{:?}", account);
        assert!(rendered.contains("12345"));
        assert!(!rendered.contains("super-secret"));
    }
}
