//! Session credentials for the betting API
//!
//! Every request carries two headers:
//! - `X-Application`: the application key
//! - `X-Authentication`: the session token from the login endpoint
//!
//! Login itself is out of scope; a valid session token is supplied by the caller.

use std::fmt;

/// Header carrying the application key
pub const APP_KEY_HEADER: &str = "X-Application";

/// Header carrying the session token
pub const SESSION_HEADER: &str = "X-Authentication";

/// Application key plus session token
#[derive(Clone)]
pub struct ApiCredentials {
    pub app_key: String,
    pub session_token: String,
}

impl ApiCredentials {
    /// Credentials from an app key and session token
    pub fn new(app_key: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self { app_key: app_key.into(), session_token: session_token.into() }
    }

    /// Read `BETFAIR_APP_KEY` and `BETFAIR_SESSION_TOKEN`
    pub fn from_env() -> Option<Self> {
        let app_key = std::env::var("BETFAIR_APP_KEY").ok()?;
        let session_token = std::env::var("BETFAIR_SESSION_TOKEN").ok()?;
        Some(Self { app_key, session_token })
    }

    /// Both values are non-empty
    pub fn is_valid(&self) -> bool {
        !self.app_key.trim().is_empty() && !self.session_token.trim().is_empty()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.app_key.chars().take(4).collect();
        f.debug_struct("ApiCredentials")
            .field("app_key", &format!("{}...", visible))
            .field("session_token", &"[REDACTED]")
            .finish()
    }
}
