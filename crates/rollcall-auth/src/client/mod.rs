//! Client side: credential storage, single-flight refresh and the HTTP API
//! client used by the CLI and embedding apps.

pub mod coordinator;
pub mod credential;
pub mod http;
pub mod store;

use thiserror::Error;

pub use coordinator::{ExchangeFailure, RefreshCoordinator, RefreshFailure, TokenExchanger};
pub use credential::{Credential, CredentialClaims};
pub use http::{HttpExchanger, RollcallClient};
pub use store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoragePolicy, StoreError,
};

/// Errors surfaced to client callers
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not signed in")]
    NotAuthenticated,

    /// The server rejected the access token
    #[error("Authorization failed")]
    Unauthorized,

    /// Refresh failed and credential state was cleared
    #[error("Session expired, please sign in again")]
    ReauthRequired,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{detail} ({status})")]
    Api { status: u16, detail: String },

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Credential storage error: {0}")]
    Store(String),
}
