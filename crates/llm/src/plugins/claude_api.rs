//! Anthropic Messages provider plugin.
//!
//! Proxies to the Anthropic API, authenticated either with a configured
//! API key or with managed OAuth credentials. Contributes routes for all
//! three client formats under its prefix and a background task that
//! refreshes the OAuth token before it expires.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret as _;

use crate::{
    LlmError,
    auth::{CredentialsManager, CredentialsStore},
    plugin::{PluginContext, PluginFactory, PluginManifest, PluginRuntime},
    protocol::{WireFormat, chat},
    proxy::ProviderAdapter,
    scheduler::ScheduledTask,
};

const PLUGIN_NAME: &str = "claude_api";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const OAUTH_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub struct ClaudeApiFactory;

impl PluginFactory for ClaudeApiFactory {
    fn manifest(&self) -> PluginManifest {
        toml::from_str(include_str!("claude_api.plugin.toml")).expect("static claude_api manifest")
    }

    fn create(&self, context: &PluginContext) -> anyhow::Result<Box<dyn PluginRuntime>> {
        let provider_config = context.provider_config(PLUGIN_NAME).cloned().unwrap_or_else(|| {
            // Loadable without explicit configuration; OAuth credentials
            // on disk are enough.
            toml::from_str(r#"type = "claude-api""#).expect("static provider defaults")
        });

        let credentials = CredentialsManager::new(
            CredentialsStore::from_env(),
            context.http.clone(),
            provider_config
                .oauth_token_url
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            Some(
                provider_config
                    .oauth_client_id
                    .clone()
                    .unwrap_or_else(|| OAUTH_CLIENT_ID.to_string()),
            ),
        );

        let provider = Arc::new(ClaudeApiProvider {
            route_prefix: provider_config.route_prefix_or(PLUGIN_NAME),
            base_url: provider_config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: provider_config.api_key.clone(),
            credentials: credentials.clone(),
            models: provider_config.models.keys().cloned().collect(),
        });

        Ok(Box::new(ClaudeApiRuntime {
            provider,
            refresh_task: Arc::new(CredentialRefreshTask { credentials }),
        }))
    }
}

struct ClaudeApiRuntime {
    provider: Arc<ClaudeApiProvider>,
    refresh_task: Arc<CredentialRefreshTask>,
}

impl PluginRuntime for ClaudeApiRuntime {
    fn provider(&self) -> Option<Arc<dyn ProviderAdapter>> {
        Some(self.provider.clone())
    }

    fn tasks(&self) -> Vec<Arc<dyn ScheduledTask>> {
        vec![self.refresh_task.clone()]
    }
}

struct ClaudeApiProvider {
    route_prefix: String,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
    credentials: CredentialsManager,
    models: Vec<String>,
}

#[async_trait]
impl ProviderAdapter for ClaudeApiProvider {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    fn upstream_format(&self) -> WireFormat {
        WireFormat::AnthropicMessages
    }

    fn upstream_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    async fn upstream_headers(&self, session_id: Option<&str>) -> crate::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        match &self.api_key {
            Some(api_key) => {
                let value = HeaderValue::from_str(api_key.expose_secret())
                    .map_err(|_| LlmError::Internal(Some("configured API key is not a valid header".to_string())))?;
                headers.insert("x-api-key", value);
            }
            None => {
                let token = self.credentials.access_token().await.map_err(LlmError::from)?;
                let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|_| LlmError::Internal(None))?;
                headers.insert(header::AUTHORIZATION, value);
                headers.insert("anthropic-beta", HeaderValue::from_static(OAUTH_BETA));
            }
        }

        if let Some(session_id) = session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert("x-session-id", value);
        }

        Ok(headers)
    }

    fn models(&self) -> chat::ModelsResponse {
        chat::ModelsResponse {
            object: "list".to_string(),
            data: self
                .models
                .iter()
                .map(|id| chat::Model {
                    id: id.clone(),
                    object: "model".to_string(),
                    created: 0,
                    owned_by: "anthropic".to_string(),
                })
                .collect(),
        }
    }
}

/// Renews the OAuth token ahead of expiry so requests never pay the
/// refresh latency.
struct CredentialRefreshTask {
    credentials: CredentialsManager,
}

#[async_trait]
impl ScheduledTask for CredentialRefreshTask {
    fn name(&self) -> &str {
        "credential_refresh"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    async fn run(&self) -> anyhow::Result<bool> {
        if !self.credentials.exists().await {
            return Ok(true);
        }

        match self.credentials.access_token().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_retryable() => {
                log::warn!("Scheduled credential refresh failed: {e}");
                Ok(false)
            }
            Err(e) => {
                // Revoked credentials cannot be fixed by retrying; stay
                // quiet until the user logs in again.
                log::warn!("Credentials are revoked, skipping refresh: {e}");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_declares_provider_routes_and_task() {
        let manifest = ClaudeApiFactory.manifest();

        assert_eq!(manifest.name, "claude_api");
        assert!(manifest.is_provider);
        assert!(manifest.tasks.contains(&"credential_refresh".to_string()));
        assert_eq!(manifest.format_adapters.len(), 3);
        assert!(manifest.format_adapters.iter().all(|d| d.is_resolvable()));
    }

    #[tokio::test]
    async fn api_key_takes_precedence_over_oauth() {
        let provider = ClaudeApiProvider {
            route_prefix: "/claude_api".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: Some(secrecy::SecretString::from("sk-test")),
            credentials: CredentialsManager::new(
                CredentialsStore::with_paths(vec![]),
                reqwest::Client::new(),
                DEFAULT_TOKEN_URL.to_string(),
                None,
            ),
            models: vec![],
        };

        let headers = provider.upstream_headers(Some("sess-1")).await.unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "sk-test");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(headers.get("x-session-id").unwrap(), "sess-1");
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_auth_error() {
        let provider = ClaudeApiProvider {
            route_prefix: "/claude_api".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            credentials: CredentialsManager::new(
                CredentialsStore::with_paths(vec![]),
                reqwest::Client::new(),
                DEFAULT_TOKEN_URL.to_string(),
                None,
            ),
            models: vec![],
        };

        let err = provider.upstream_headers(None).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed(_)));
    }
}
