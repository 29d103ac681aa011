//! Shared application state

use std::time::Duration;

use axum::http::{header, HeaderMap};
use rollcall_attendance::AttendanceManager;
use rollcall_auth::CredentialService;
use rollcall_core::{Config, Database, Error, Principal, Result};

use crate::rate_limit::RateLimiter;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Kiosks, sessions and check-ins
    pub attendance: AttendanceManager,
    /// Login, refresh and access-token verification
    pub credentials: CredentialService,
    /// Guards PIN resolution endpoints
    pub pin_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let pin_limiter = RateLimiter::new(
            config.pin_lookup_limit,
            Duration::from_secs(config.pin_lookup_window_secs),
        );
        Self {
            attendance: AttendanceManager::new(db.clone(), &config),
            credentials: CredentialService::new(db, &config),
            pin_limiter,
            config,
        }
    }

    /// Verify the bearer access token on a request
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let token = bearer_token(headers)
            .ok_or_else(|| Error::Unauthenticated("missing bearer token".to_string()))?;
        self.credentials.authenticate(&token)
    }

    /// Authenticate, then count the request against the PIN lookup limit
    pub fn authenticate_pin_lookup(&self, headers: &HeaderMap) -> Result<Principal> {
        let principal = self.authenticate(headers)?;
        self.pin_limiter.check(&principal.subject)?;
        Ok(principal)
    }
}

/// Extract a bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
