//! Configuration types for Rollcall

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default width of a token window in seconds
pub const DEFAULT_ROTATE_SECONDS: u32 = 30;

/// Default age after which an active session is closed automatically
pub const DEFAULT_SESSION_MAX_MINUTES: u32 = 90;

/// Main configuration for the Rollcall server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Path to the SQLite database file
    pub database_path: PathBuf,
    /// Width of a check-in token window in seconds.
    ///
    /// Copied into every session at creation, so kiosk and verifier agree
    /// without negotiating per request.
    pub rotate_seconds: u32,
    /// Active sessions older than this are closed on next access
    pub session_max_minutes: u32,
    /// HMAC secret for signing access tokens
    #[serde(skip_serializing, default)]
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: i64,
    /// Maximum PIN lookups per principal within one rate-limit window
    pub pin_lookup_limit: u32,
    /// Rate-limit window for PIN lookups in seconds
    pub pin_lookup_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: Self::default_database_path(),
            rotate_seconds: DEFAULT_ROTATE_SECONDS,
            session_max_minutes: DEFAULT_SESSION_MAX_MINUTES,
            jwt_secret: String::new(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 30 * 24 * 3600,
            pin_lookup_limit: 25,
            pin_lookup_window_secs: 60,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default database location (~/.local/share/rollcall/rollcall.db)
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rollcall")
            .join("rollcall.db")
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set database path
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Builder pattern: set token window width
    pub fn with_rotate_seconds(mut self, seconds: u32) -> Self {
        self.rotate_seconds = seconds.max(1);
        self
    }

    /// Builder pattern: set maximum session age
    pub fn with_session_max_minutes(mut self, minutes: u32) -> Self {
        self.session_max_minutes = minutes.max(1);
        self
    }

    /// Builder pattern: set the access token signing secret
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    /// Builder pattern: set token lifetimes
    pub fn with_token_ttls(mut self, access_secs: i64, refresh_secs: i64) -> Self {
        self.access_ttl_secs = access_secs;
        self.refresh_ttl_secs = refresh_secs;
        self
    }

    /// Builder pattern: set PIN lookup rate limit
    pub fn with_pin_lookup_limit(mut self, limit: u32, window_secs: u64) -> Self {
        self.pin_lookup_limit = limit;
        self.pin_lookup_window_secs = window_secs;
        self
    }

    /// Maximum session age in seconds
    pub fn session_max_secs(&self) -> i64 {
        i64::from(self.session_max_minutes) * 60
    }
}
