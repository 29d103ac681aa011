//! HTTP client for the Rollcall API
//!
//! Every authenticated call goes through the [`RefreshCoordinator`], so an
//! expired access token is refreshed once and the call retried.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Method, Response, StatusCode};
use rollcall_core::protocol::{
    CheckInRequest, CheckInResponse, ErrorBody, LoginRequest, RefreshRequest, TokenPair,
};
use rollcall_core::Principal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::coordinator::{ExchangeFailure, RefreshCoordinator, TokenExchanger};
use super::credential::Credential;
use super::store::CredentialStore;
use super::ClientError;

/// Exchanges refresh tokens against `POST /api/auth/refresh`
pub struct HttpExchanger {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExchanger {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl TokenExchanger for HttpExchanger {
    fn exchange(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenPair, ExchangeFailure>> {
        let request = self
            .http
            .post(format!("{}/api/auth/refresh", self.base_url))
            .json(&RefreshRequest { refresh_token });

        async move {
            let response = request
                .send()
                .await
                .map_err(|e| ExchangeFailure::Transport(e.to_string()))?;

            match response.status() {
                status if status.is_success() => response
                    .json::<TokenPair>()
                    .await
                    .map_err(|e| ExchangeFailure::Transport(e.to_string())),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                    Err(ExchangeFailure::Rejected)
                }
                status => Err(ExchangeFailure::Transport(format!("refresh returned {status}"))),
            }
        }
        .boxed()
    }
}

/// Rollcall API client
#[derive(Clone)]
pub struct RollcallClient {
    http: reqwest::Client,
    base_url: String,
    coordinator: RefreshCoordinator,
}

impl RollcallClient {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::new();
        let exchanger = Arc::new(HttpExchanger::new(http.clone(), base_url.clone()));
        Self {
            http,
            base_url,
            coordinator: RefreshCoordinator::new(store, exchanger),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn credential(&self) -> Option<Credential> {
        self.coordinator.current()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sign in and store the resulting credential
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, ClientError> {
        let request = self.http.post(self.url("/api/auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let pair: TokenPair = read_json(request.send()).await?;
        let credential = Credential::from(pair);
        self.coordinator.set_credential(&credential)?;
        Ok(credential)
    }

    /// Revoke the refresh token on the server and drop local state.
    /// Local state is cleared even if the server cannot be reached.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let Some(credential) = self.coordinator.current() else {
            return Ok(());
        };
        let request = self
            .http
            .post(self.url("/api/auth/logout"))
            .json(&RefreshRequest {
                refresh_token: credential.refresh_token,
            });
        let sent = request.send().await;
        self.coordinator.clear()?;
        read_empty(sent).await
    }

    /// The principal the server sees for the current credential
    pub async fn me(&self) -> Result<Principal, ClientError> {
        self.get("/api/auth/me").await
    }

    pub async fn check_in(&self, request: &CheckInRequest) -> Result<CheckInResponse, ClientError> {
        self.post("/api/check-in", request).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_json(Method::GET, path, None::<&()>).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_json(Method::DELETE, path, None::<&()>).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(%method, %url, "API request");
        self.coordinator
            .execute(|token| {
                let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
                if let Some(body) = body {
                    request = request.json(body);
                }
                read_json(request.send())
            })
            .await
    }
}

async fn into_checked(
    sent: impl std::future::Future<Output = reqwest::Result<Response>>,
) -> Result<Response, ClientError> {
    let response = sent.await.map_err(|e| ClientError::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }

    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.detail)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        detail,
    })
}

async fn read_json<T: DeserializeOwned>(
    sent: impl std::future::Future<Output = reqwest::Result<Response>>,
) -> Result<T, ClientError> {
    into_checked(sent)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

async fn read_empty(sent: reqwest::Result<Response>) -> Result<(), ClientError> {
    into_checked(async { sent }).await.map(|_| ())
}
