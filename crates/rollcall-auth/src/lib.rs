//! Rollcall Auth - Accounts, access tokens and credential refresh
//!
//! Server side, [`CredentialService`] issues a short-lived JWT access token
//! plus an opaque, single-use refresh token on login, and rotates the pair
//! on every refresh.
//!
//! Client side, [`client::RefreshCoordinator`] wraps every authenticated
//! call: on an authorization failure it exchanges the refresh token once
//! (collapsing concurrent attempts into one exchange) and retries.
//!
//! # Example
//!
//! ```no_run
//! use rollcall_auth::client::{FileCredentialStore, RollcallClient};
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FileCredentialStore::new()?);
//!     let client = RollcallClient::new("http://localhost:8080", store);
//!
//!     client.login("ann", "correct horse").await?;
//!     let me = client.me().await?;
//!     println!("Signed in as {} ({})", me.name, me.role);
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod claims;
pub mod client;
pub mod jwt;
pub mod password;
pub mod service;

pub use account::{Account, AccountInfo, NewAccount};
pub use claims::Claims;
pub use jwt::JwtManager;
pub use service::CredentialService;
