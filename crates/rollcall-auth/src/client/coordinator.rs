//! Single-flight credential refresh
//!
//! Refresh tokens rotate on every use, so two concurrent exchanges of the
//! same token would see the second rejected and tear the session down.
//! The coordinator keeps one in-flight exchange per credential identity in a
//! mutex-guarded map. The first caller to find an expired access token
//! spawns the exchange; everyone else awaits a clone of the same shared
//! handle.
//!
//! The spawned task writes the outcome to the store and removes its map
//! entry before any waiter sees the result. Callers arriving after that
//! find the store already holds a newer access token and use it directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use rollcall_core::protocol::TokenPair;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::store::{CredentialStore, StoragePolicy};
use super::ClientError;

/// Why an exchange failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeFailure {
    /// The server refused the refresh token: invalid, expired or already rotated
    Rejected,
    /// The server could not be reached or answered unexpectedly
    Transport(String),
}

/// Outcome shared by every caller waiting on one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// Credential state has been cleared; the user must sign in again
    ReauthRequired,
    /// Credential state is untouched; a later call may retry
    Transport(String),
}

impl From<RefreshFailure> for ClientError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::ReauthRequired => ClientError::ReauthRequired,
            RefreshFailure::Transport(message) => ClientError::Transport(message),
        }
    }
}

/// Exchanges a refresh token for a new pair
pub trait TokenExchanger: Send + Sync {
    fn exchange(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenPair, ExchangeFailure>>;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshFailure>>>;

struct Inner {
    store: Arc<dyn CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    in_flight: Mutex<HashMap<String, SharedRefresh>>,
}

/// Wraps authenticated calls, refreshing the credential at most once per
/// expiry no matter how many calls observe it
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                exchanger,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> StoragePolicy {
        self.inner.store.policy()
    }

    pub fn current(&self) -> Option<Credential> {
        self.inner.store.load()
    }

    /// Store a credential obtained by logging in
    pub fn set_credential(&self, credential: &Credential) -> Result<(), ClientError> {
        self.inner
            .store
            .save(credential)
            .map_err(|e| ClientError::Store(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        self.inner
            .store
            .clear()
            .map_err(|e| ClientError::Store(e.to_string()))
    }

    /// Run `op` with the current access token. If it reports an
    /// authorization failure, refresh once and run it once more.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let credential = self.current().ok_or(ClientError::NotAuthenticated)?;

        match op(credential.access_token.clone()).await {
            Err(ClientError::Unauthorized) => {
                debug!("Access token rejected, refreshing");
                let fresh = self.refresh(&credential.access_token).await?;
                op(fresh.access_token).await
            }
            other => other,
        }
    }

    /// Obtain a credential newer than the one holding `stale_access_token`
    pub async fn refresh(&self, stale_access_token: &str) -> Result<Credential, RefreshFailure> {
        let handle = {
            let mut in_flight = self.inner.in_flight.lock().await;

            let current = self
                .inner
                .store
                .load()
                .ok_or(RefreshFailure::ReauthRequired)?;
            if current.access_token != stale_access_token {
                // Someone already refreshed
                return Ok(current);
            }

            let key = current.identity();
            match in_flight.get(&key) {
                Some(handle) => handle.clone(),
                None => {
                    let handle = Inner::spawn_exchange(&self.inner, key.clone(), current.refresh_token);
                    in_flight.insert(key, handle.clone());
                    handle
                }
            }
        };

        handle.await
    }
}

impl Inner {
    /// Start the exchange on its own task so it settles even if every
    /// waiter is dropped. Must be called with the in-flight lock held.
    fn spawn_exchange(inner: &Arc<Inner>, key: String, refresh_token: String) -> SharedRefresh {
        let task_inner = Arc::clone(inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move { task_inner.run_exchange(&task_key, refresh_token).await });

        let inner = Arc::clone(inner);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    inner.in_flight.lock().await.remove(&key);
                    Err(RefreshFailure::Transport(format!("refresh task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_exchange(&self, key: &str, refresh_token: String) -> Result<Credential, RefreshFailure> {
        let outcome = match self.exchanger.exchange(refresh_token).await {
            Ok(pair) => {
                let credential = Credential::from(pair);
                match self.store.save(&credential) {
                    Ok(()) => {
                        info!(policy = ?self.store.policy(), "Credential refreshed");
                        Ok(credential)
                    }
                    Err(e) => Err(RefreshFailure::Transport(format!("failed to store credential: {e}"))),
                }
            }
            Err(ExchangeFailure::Rejected) => {
                warn!("Refresh token rejected, clearing credentials");
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear credentials: {}", e);
                }
                Err(RefreshFailure::ReauthRequired)
            }
            Err(ExchangeFailure::Transport(message)) => {
                warn!(error = %message, "Refresh exchange failed");
                Err(RefreshFailure::Transport(message))
            }
        };

        self.in_flight.lock().await.remove(key);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Server double: accepts exactly the one live refresh token and rotates it
    struct FakeServer {
        live: std::sync::Mutex<String>,
        calls: AtomicUsize,
        transport_down: bool,
    }

    impl FakeServer {
        fn new(live: &str) -> Arc<Self> {
            Arc::new(Self {
                live: std::sync::Mutex::new(live.to_string()),
                calls: AtomicUsize::new(0),
                transport_down: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenExchanger for Arc<FakeServer> {
        fn exchange(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenPair, ExchangeFailure>> {
            let server = Arc::clone(self);
            async move {
                let n = server.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                if server.transport_down {
                    return Err(ExchangeFailure::Transport("connection refused".into()));
                }
                let mut live = server.live.lock().unwrap();
                if *live != refresh_token {
                    return Err(ExchangeFailure::Rejected);
                }
                *live = format!("refresh-{n}");
                Ok(TokenPair {
                    access_token: format!("access-{n}"),
                    refresh_token: live.clone(),
                    expires_in: 900,
                })
            }
            .boxed()
        }
    }

    fn coordinator(server: &Arc<FakeServer>, credential: Credential) -> (RefreshCoordinator, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::seeded(credential));
        let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(Arc::clone(server)));
        (coordinator, store)
    }

    /// An API call that only accepts fresh access tokens
    async fn call(token: String) -> Result<String, ClientError> {
        if token.starts_with("access-") {
            Ok(token)
        } else {
            Err(ClientError::Unauthorized)
        }
    }

    #[tokio::test]
    async fn test_parallel_failures_share_one_exchange() {
        let server = FakeServer::new("refresh-0");
        let (coordinator, store) = coordinator(&server, Credential::new("expired", "refresh-0"));

        let calls = (0..10).map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.execute(call).await })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap().unwrap(), "access-1");
        }
        assert_eq!(server.calls(), 1);
        assert_eq!(store.load(), Some(Credential::new("access-1", "refresh-1")));
        assert!(coordinator.inner.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_late_caller_reuses_settled_refresh() {
        let server = FakeServer::new("refresh-0");
        let (coordinator, _store) = coordinator(&server, Credential::new("expired", "refresh-0"));

        coordinator.refresh("expired").await.unwrap();
        // A call that started with the old token and failed afterwards
        let again = coordinator.refresh("expired").await.unwrap();
        assert_eq!(again.access_token, "access-1");
        assert_eq!(server.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_refresh_token_clears_state() {
        // Server has already rotated past the token we hold
        let server = FakeServer::new("refresh-7");
        let (coordinator, store) = coordinator(&server, Credential::new("expired", "refresh-0"));

        let result = coordinator.execute(call).await;
        assert!(matches!(result, Err(ClientError::ReauthRequired)));
        assert!(store.load().is_none());

        // No credential left to refresh
        assert!(matches!(
            coordinator.execute(call).await,
            Err(ClientError::NotAuthenticated)
        ));
        assert_eq!(server.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_credential() {
        let server = Arc::new(FakeServer {
            live: std::sync::Mutex::new("refresh-0".into()),
            calls: AtomicUsize::new(0),
            transport_down: true,
        });
        let (coordinator, store) = coordinator(&server, Credential::new("expired", "refresh-0"));

        let result = coordinator.execute(call).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(store.load(), Some(Credential::new("expired", "refresh-0")));
    }

    #[tokio::test]
    async fn test_success_needs_no_refresh() {
        let server = FakeServer::new("refresh-0");
        let (coordinator, _store) = coordinator(&server, Credential::new("access-0", "refresh-0"));

        assert_eq!(coordinator.execute(call).await.unwrap(), "access-0");
        assert_eq!(server.calls(), 0);
    }

    #[tokio::test]
    async fn test_retries_only_once() {
        let server = FakeServer::new("refresh-0");
        let (coordinator, _store) = coordinator(&server, Credential::new("expired", "refresh-0"));

        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = coordinator
            .execute(|_token| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Unauthorized) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(server.calls(), 1);
    }
}
