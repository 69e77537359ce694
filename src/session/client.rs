//! Consumer-side session client with transparent refresh.
//!
//! Many independent requests can fail with an expired access token at nearly
//! the same moment. The client holds at most one in-flight refresh: a latch
//! serializes refresh attempts, and a token double-check after acquiring it
//! lets late arrivals reuse the rotation a concurrent request already
//! performed. A failed request is retried exactly once with the new token;
//! a second failure surfaces to the caller.
//!
//! Session lifecycle: Anonymous -> Authenticating -> Authenticated,
//! with Refreshing as a transient sub-state of Authenticated, falling back
//! to Anonymous on logout or irrecoverable refresh failure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::auth::models::{
    LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, TokenResponse, UserResponse,
};
use crate::session::storage::{TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug)]
pub enum SessionError {
    Transport(reqwest::Error),
    /// No stored credentials to refresh with.
    NotAuthenticated,
    /// The refresh endpoint rejected the rotation; local state was cleared.
    RefreshFailed(u16),
    /// The refresh call exceeded its deadline; local state was cleared.
    Timeout,
    /// Any non-success API response, body included for inspection.
    Api { status: u16, body: String },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "transport error: {e}"),
            SessionError::NotAuthenticated => write!(f, "not authenticated"),
            SessionError::RefreshFailed(status) => write!(f, "refresh rejected ({status})"),
            SessionError::Timeout => write!(f, "refresh timed out"),
            SessionError::Api { status, body } => write!(f, "api error {status}: {body}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Transport(e)
    }
}

pub struct SessionClient {
    http: Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    /// Current access token, mirrored into every outgoing request.
    access_token: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    /// The single in-flight-refresh slot.
    refresh_latch: AsyncMutex<()>,
    refresh_timeout: Duration,
}

impl SessionClient {
    pub fn new(base_url: &str, store: Arc<dyn TokenStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            access_token: RwLock::new(None),
            state: RwLock::new(SessionState::Anonymous),
            refresh_latch: AsyncMutex::new(()),
            refresh_timeout: Duration::from_secs(10),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.read().clone()
    }

    /// Restore a session from durable storage, e.g. at application start.
    pub fn hydrate(&self) {
        let access = self.store.get(ACCESS_TOKEN_KEY);
        if access.is_some() && self.store.get(REFRESH_TOKEN_KEY).is_some() {
            *self.access_token.write() = access;
            self.set_state(SessionState::Authenticated);
            debug!("Session hydrated from durable storage");
        }
    }

    fn install_tokens(&self, pair: &TokenResponse) {
        self.store.set(ACCESS_TOKEN_KEY, &pair.access_token);
        self.store.set(REFRESH_TOKEN_KEY, &pair.refresh_token);
        *self.access_token.write() = Some(pair.access_token.clone());
        self.set_state(SessionState::Authenticated);
    }

    /// Local logout: wipe credentials without touching the server.
    fn clear_local(&self) {
        self.store.remove(ACCESS_TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
        *self.access_token.write() = None;
        self.set_state(SessionState::Anonymous);
    }

    // ===== Auth endpoints (exempt from the refresh interceptor) =====

    pub async fn register(&self, email: &str, password: &str) -> Result<UserResponse, SessionError> {
        let resp = self
            .http
            .post(format!("{}/auth/register", self.base_url))
            .json(&RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        into_json(resp).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        self.set_state(SessionState::Authenticating);
        let resp = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                self.set_state(SessionState::Anonymous);
                return Err(e.into());
            }
        };

        if !resp.status().is_success() {
            self.set_state(SessionState::Anonymous);
            return Err(api_error(resp).await);
        }

        let pair: TokenResponse = resp.json().await?;
        self.install_tokens(&pair);
        info!("🔐 Session authenticated");
        Ok(())
    }

    /// Revoke the refresh token server-side, then clear local state. Local
    /// state is cleared even if the revoke call fails.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store.get(REFRESH_TOKEN_KEY) {
            let mut req = self
                .http
                .post(format!("{}/auth/logout", self.base_url))
                .json(&LogoutRequest { refresh_token });
            if let Some(token) = self.access_token() {
                req = req.bearer_auth(token);
            }
            if let Err(e) = req.send().await {
                warn!("Logout revoke call failed: {e}");
            }
        }
        self.clear_local();
    }

    pub async fn me(&self) -> Result<UserResponse, SessionError> {
        self.get_json("/auth/me").await
    }

    // ===== Generic authorized calls =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let resp = self
            .send_authorized(Method::GET, path, None::<&()>)
            .await?;
        into_json(resp).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        let resp = self.send_authorized(Method::POST, path, Some(body)).await?;
        into_json(resp).await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        let resp = self.send_authorized(Method::PUT, path, Some(body)).await?;
        into_json(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), SessionError> {
        let resp = self
            .send_authorized(Method::DELETE, path, None::<&()>)
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp).await)
        }
    }

    /// Send a request with the current access token. On 401, refresh once
    /// (coalesced with any concurrent refresh) and retry the request exactly
    /// once; the retry's outcome is final.
    async fn send_authorized<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, SessionError> {
        let token = self.access_token();
        let resp = self.dispatch(&method, path, body, token.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!("401 on {path}, entering refresh path");
        match self.refresh_access(token.as_deref()).await {
            Ok(new_token) => self.dispatch(&method, path, body, Some(&new_token)).await,
            Err(e) => {
                // Local state is already cleared; the caller gets the
                // original 401, not the refresh failure.
                warn!("Refresh failed ({e}), surfacing original response");
                Ok(resp)
            }
        }
    }

    async fn dispatch<B: Serialize>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, SessionError> {
        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    /// Rotate the token pair, holding the single in-flight-refresh slot.
    ///
    /// `failed_token` is the access token the caller just got a 401 with.
    /// If the stored token differs once the latch is acquired, another task
    /// already completed the rotation and its result is reused.
    async fn refresh_access(&self, failed_token: Option<&str>) -> Result<String, SessionError> {
        let _guard = self.refresh_latch.lock().await;

        if let Some(current) = self.access_token() {
            if failed_token != Some(current.as_str()) {
                debug!("Coalesced into a completed refresh");
                return Ok(current);
            }
        }

        let Some(refresh_token) = self.store.get(REFRESH_TOKEN_KEY) else {
            self.clear_local();
            return Err(SessionError::NotAuthenticated);
        };

        self.set_state(SessionState::Refreshing);

        let request = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&RefreshRequest { refresh_token })
            .send();

        let resp = match tokio::time::timeout(self.refresh_timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.clear_local();
                return Err(SessionError::Transport(e));
            }
            Err(_) => {
                warn!("Refresh call exceeded {:?}", self.refresh_timeout);
                self.clear_local();
                return Err(SessionError::Timeout);
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            // The refresh token is already invalid server-side; a revoke
            // call would be redundant.
            self.clear_local();
            warn!("Refresh rejected ({status}), session cleared");
            return Err(SessionError::RefreshFailed(status));
        }

        let pair: TokenResponse = match resp.json().await {
            Ok(pair) => pair,
            Err(e) => {
                self.clear_local();
                return Err(SessionError::Transport(e));
            }
        };

        self.install_tokens(&pair);
        debug!("Token pair rotated");
        Ok(pair.access_token)
    }
}

async fn api_error(resp: reqwest::Response) -> SessionError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    SessionError::Api { status, body }
}

async fn into_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SessionError> {
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::storage::MemoryTokenStore;

    fn client_with_store() -> (SessionClient, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        let client = SessionClient::new("http://127.0.0.1:1", store.clone()).unwrap();
        (client, store)
    }

    #[test]
    fn test_starts_anonymous() {
        let (client, _store) = client_with_store();
        assert_eq!(client.state(), SessionState::Anonymous);
        assert!(client.access_token().is_none());
    }

    #[test]
    fn test_hydrate_requires_both_tokens() {
        let (client, store) = client_with_store();

        // Access token alone is not a session.
        store.set(ACCESS_TOKEN_KEY, "orphan-access");
        client.hydrate();
        assert_eq!(client.state(), SessionState::Anonymous);

        store.set(REFRESH_TOKEN_KEY, "refresh");
        client.hydrate();
        assert_eq!(client.state(), SessionState::Authenticated);
        assert_eq!(client.access_token().as_deref(), Some("orphan-access"));
    }

    #[test]
    fn test_install_and_clear_round_trip() {
        let (client, store) = client_with_store();

        let pair = TokenResponse::bearer("access-1".to_string(), "refresh-1".to_string());
        client.install_tokens(&pair);
        assert_eq!(client.state(), SessionState::Authenticated);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("access-1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-1"));

        client.clear_local();
        assert_eq!(client.state(), SessionState::Anonymous);
        assert!(store.get(ACCESS_TOKEN_KEY).is_none());
        assert!(store.get(REFRESH_TOKEN_KEY).is_none());
        assert!(client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_credentials_clears_and_fails() {
        let (client, _store) = client_with_store();
        let result = client.refresh_access(None).await;
        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
        assert_eq!(client.state(), SessionState::Anonymous);
    }
}
