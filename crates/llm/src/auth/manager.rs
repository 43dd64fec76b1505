use std::{sync::Arc, time::Duration};

use futures::{FutureExt as _, future::{BoxFuture, Shared}};
use jiff::Timestamp;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AccountProfile, Credentials, CredentialsStore, OAuthError};

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

type RefreshFuture = Shared<BoxFuture<'static, Result<Credentials, OAuthError>>>;

/// Per-provider credential manager with single-flight refresh.
///
/// `access_token` returns the current token when valid; otherwise the
/// first caller starts a refresh and every concurrent caller awaits the
/// same outcome. A 4xx from the token endpoint marks the credentials
/// revoked; transient failures leave the next request free to retry.
#[derive(Clone)]
pub struct CredentialsManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: CredentialsStore,
    http: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    state: Mutex<State>,
    refresh: Mutex<Option<RefreshFuture>>,
}

#[derive(Default)]
struct State {
    credentials: Option<Credentials>,
    profile: Option<AccountProfile>,
    revoked: bool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

impl CredentialsManager {
    pub fn new(store: CredentialsStore, http: reqwest::Client, token_url: String, client_id: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                http,
                token_url,
                client_id,
                state: Mutex::new(State::default()),
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Return a valid access token, refreshing if needed.
    pub async fn access_token(&self) -> Result<SecretString, OAuthError> {
        {
            let mut state = self.inner.state.lock().await;

            if state.credentials.is_none() {
                state.credentials = self.inner.store.load().await;
            }

            if let Some(credentials) = &state.credentials
                && credentials.is_valid()
            {
                return Ok(credentials.access_token.clone());
            }

            if state.revoked {
                return Err(OAuthError::Revoked("credentials previously revoked".to_string()));
            }
        }

        let (future, is_leader) = {
            let mut slot = self.inner.refresh.lock().await;
            match &*slot {
                Some(shared) => (shared.clone(), false),
                None => {
                    let inner = self.inner.clone();
                    let shared: RefreshFuture = async move { inner.refresh().await }.boxed().shared();
                    *slot = Some(shared.clone());
                    (shared, true)
                }
            }
        };

        let result = future.await;

        if is_leader {
            *self.inner.refresh.lock().await = None;
        }

        result.map(|credentials| credentials.access_token)
    }

    /// Load credentials from disk into memory, reporting presence.
    pub async fn load(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        state.credentials = self.inner.store.load().await;
        state.credentials.is_some()
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.inner.state.lock().await.credentials.clone()
    }

    pub async fn profile(&self) -> Option<AccountProfile> {
        self.inner.state.lock().await.profile.clone()
    }

    pub async fn set_profile(&self, profile: AccountProfile) {
        self.inner.state.lock().await.profile = Some(profile);
    }

    /// Remove the credential file and clear in-memory state.
    pub async fn delete(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        state.credentials = None;
        state.profile = None;
        state.revoked = false;
        drop(state);

        self.inner.store.delete().await
    }

    pub async fn exists(&self) -> bool {
        self.inner.store.exists().await
    }
}

impl Inner {
    async fn refresh(self: Arc<Self>) -> Result<Credentials, OAuthError> {
        let refresh_token = {
            let state = self.state.lock().await;
            let credentials = state.credentials.as_ref().ok_or(OAuthError::MissingCredentials)?;
            credentials.refresh_token.expose_secret().to_string()
        };

        if refresh_token.is_empty() {
            return Err(OAuthError::MissingCredentials);
        }

        log::debug!("Refreshing OAuth token against {}", self.token_url);

        let mut body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });
        if let Some(client_id) = &self.client_id {
            body["client_id"] = serde_json::Value::String(client_id.clone());
        }

        let response = self
            .http
            .post(&self.token_url)
            .timeout(REFRESH_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| OAuthError::Transient(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Token refresh rejected ({status}): {body}");

            self.state.lock().await.revoked = true;
            return Err(OAuthError::Revoked(body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Token refresh failed ({status}): {body}");
            return Err(OAuthError::Transient(format!("token endpoint returned {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::Transient(format!("malformed token response: {e}")))?;

        let credentials = {
            let mut state = self.state.lock().await;
            let previous = state.credentials.take().ok_or(OAuthError::MissingCredentials)?;

            let credentials = Credentials {
                access_token: SecretString::from(token.access_token),
                refresh_token: token
                    .refresh_token
                    .map(SecretString::from)
                    .unwrap_or(previous.refresh_token),
                expires_at: Timestamp::now() + jiff::SignedDuration::from_secs(token.expires_in),
                scopes: token
                    .scope
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or(previous.scopes),
                subscription_type: previous.subscription_type,
                token_type: previous.token_type,
            };

            state.credentials = Some(credentials.clone());
            credentials
        };

        // Persisted outside the state lock; the single-flight guard
        // already guarantees one writer per manager.
        if let Err(e) = self.store.save(&credentials).await {
            log::error!("Failed to persist refreshed credentials: {e}");
        }

        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State as AxumState, routing::post};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct TokenEndpoint {
        hits: Arc<AtomicUsize>,
        status: u16,
    }

    async fn token_handler(
        AxumState(state): AxumState<TokenEndpoint>,
        Json(body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        assert_eq!(body["grant_type"], "refresh_token");

        match state.status {
            200 => (
                axum::http::StatusCode::OK,
                Json(json!({"access_token": "T2", "refresh_token": "R2", "expires_in": 3600})),
            ),
            400 => (
                axum::http::StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_grant"})),
            ),
            _ => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "server_error"})),
            ),
        }
    }

    async fn spawn_token_endpoint(status: u16) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = TokenEndpoint {
            hits: hits.clone(),
            status,
        };

        let app = Router::new().route("/v1/oauth/token", post(token_handler)).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}/v1/oauth/token"), hits)
    }

    async fn seeded_manager(token_url: String, dir: &tempfile::TempDir) -> CredentialsManager {
        let path = dir.path().join("credentials.json");
        let store = CredentialsStore::with_paths(vec![path]);

        // Expired a second ago.
        let expired = Credentials {
            access_token: SecretString::from("T1"),
            refresh_token: SecretString::from("R1"),
            expires_at: Timestamp::now() - jiff::SignedDuration::from_secs(1),
            scopes: vec!["user:inference".to_string()],
            subscription_type: Some("max".to_string()),
            token_type: "Bearer".to_string(),
        };
        store.save(&expired).await.unwrap();

        CredentialsManager::new(store, reqwest::Client::new(), token_url, Some("client-1".to_string()))
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let (url, hits) = spawn_token_endpoint(200).await;
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialsStore::with_paths(vec![dir.path().join("credentials.json")]);

        let fresh = Credentials {
            access_token: SecretString::from("T1"),
            refresh_token: SecretString::from("R1"),
            expires_at: Timestamp::now() + jiff::SignedDuration::from_secs(3600),
            scopes: vec![],
            subscription_type: None,
            token_type: "Bearer".to_string(),
        };
        store.save(&fresh).await.unwrap();

        let manager = CredentialsManager::new(store, reqwest::Client::new(), url, None);
        let token = manager.access_token().await.unwrap();

        assert_eq!(token.expose_secret(), "T1");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let (url, hits) = spawn_token_endpoint(200).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = seeded_manager(url, &dir).await;
        manager.load().await;

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.access_token().await })
            })
            .collect();

        for task in tasks {
            let token = task.await.unwrap().unwrap();
            assert_eq!(token.expose_secret(), "T2");
        }

        // Exactly one POST to the token endpoint.
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // File rewritten with the new expiry (~ now + 3600s).
        let saved = manager.credentials().await.unwrap();
        let remaining = saved.expires_at.as_second() - Timestamp::now().as_second();
        assert!((3590..=3610).contains(&remaining), "remaining {remaining}");
    }

    #[tokio::test]
    async fn invalid_grant_marks_credentials_revoked() {
        let (url, hits) = spawn_token_endpoint(400).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = seeded_manager(url, &dir).await;
        manager.load().await;

        let err = manager.access_token().await.unwrap_err();
        assert!(matches!(err, OAuthError::Revoked(_)));
        assert!(!err.is_retryable());

        // Subsequent calls fail fast without another POST.
        let err = manager.access_token().await.unwrap_err();
        assert!(matches!(err, OAuthError::Revoked(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let (url, hits) = spawn_token_endpoint(500).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = seeded_manager(url, &dir).await;
        manager.load().await;

        let err = manager.access_token().await.unwrap_err();
        assert!(err.is_retryable());

        // The next attempt tries again from scratch.
        let err = manager.access_token().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delete_clears_state_and_file() {
        let (url, _hits) = spawn_token_endpoint(200).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = seeded_manager(url, &dir).await;
        manager.load().await;

        assert!(manager.exists().await);
        assert!(manager.delete().await);
        assert!(!manager.exists().await);
        assert!(manager.credentials().await.is_none());
    }
}
