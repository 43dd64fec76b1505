//! Codex provider plugin.
//!
//! Proxies to an OpenAI Responses-only upstream that always streams.
//! Unary clients are served through the stream-buffer adapter; the
//! provider supplies an SSE extractor that pulls the final response object
//! out of the buffered `response.completed` event.

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret as _;
use serde_json::Value;

use crate::{
    LlmError,
    plugin::{PluginContext, PluginFactory, PluginManifest, PluginRuntime},
    protocol::{WireFormat, chat},
    proxy::ProviderAdapter,
    sse::JsonEventStream,
    streaming::SseExtractor,
};

const PLUGIN_NAME: &str = "codex";
const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";

pub struct CodexFactory;

impl PluginFactory for CodexFactory {
    fn manifest(&self) -> PluginManifest {
        toml::from_str(include_str!("codex.plugin.toml")).expect("static codex manifest")
    }

    fn create(&self, context: &PluginContext) -> anyhow::Result<Box<dyn PluginRuntime>> {
        let provider_config = context
            .provider_config(PLUGIN_NAME)
            .cloned()
            .unwrap_or_else(|| toml::from_str(r#"type = "codex""#).expect("static provider defaults"));

        let provider = Arc::new(CodexProvider {
            route_prefix: provider_config.route_prefix_or(PLUGIN_NAME),
            base_url: provider_config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: provider_config.api_key.clone(),
            models: provider_config.models.keys().cloned().collect(),
        });

        Ok(Box::new(CodexRuntime { provider }))
    }
}

struct CodexRuntime {
    provider: Arc<CodexProvider>,
}

impl PluginRuntime for CodexRuntime {
    fn provider(&self) -> Option<Arc<dyn ProviderAdapter>> {
        Some(self.provider.clone())
    }
}

struct CodexProvider {
    route_prefix: String,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
    models: Vec<String>,
}

#[async_trait]
impl ProviderAdapter for CodexProvider {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    fn upstream_format(&self) -> WireFormat {
        WireFormat::Responses
    }

    fn supports_unary_upstream(&self) -> bool {
        // The Codex backend only speaks SSE.
        false
    }

    fn upstream_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    async fn upstream_headers(&self, session_id: Option<&str>) -> crate::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("openai-beta", HeaderValue::from_static("responses=experimental"));
        headers.insert("originator", HeaderValue::from_static("ccproxy"));

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::AuthenticationFailed("no API key configured for codex".to_string()))?;

        let value = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            .map_err(|_| LlmError::Internal(None))?;
        headers.insert(header::AUTHORIZATION, value);

        if let Some(session_id) = session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert("x-session-id", value.clone());
            headers.insert("session_id", value);
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
                    owned_by: "openai".to_string(),
                })
                .collect(),
        }
    }

    fn sse_extractor(&self) -> Option<SseExtractor> {
        Some(Box::new(extract_completed_response))
    }
}

/// Pull the response object out of the terminal `response.completed` (or
/// `response.incomplete` / `response.failed`) event in buffered SSE.
fn extract_completed_response(text: &str) -> Option<Value> {
    let mut stream = JsonEventStream::new();
    let mut values = stream.feed(text.as_bytes());
    values.extend(stream.finish());

    let mut result = None;

    for value in values {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        if matches!(kind, "response.completed" | "response.incomplete" | "response.failed")
            && let Some(response) = value.get("response").filter(|r| r.is_object())
        {
            result = Some(response.clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_declares_streaming_only_provider() {
        let manifest = CodexFactory.manifest();
        assert_eq!(manifest.name, "codex");
        assert!(manifest.is_provider);
        assert!(manifest.format_adapters.iter().all(|d| d.is_resolvable()));
    }

    #[test]
    fn extractor_takes_the_terminal_response_object() {
        let text = concat!(
            "event: response.created\n",
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"r\",\"status\":\"in_progress\"}}\n\n",
            "event: response.output_text.delta\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n",
            "event: response.completed\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r\",\"status\":\"completed\",\"model\":\"gpt-5\"}}\n\n",
        );

        let response = extract_completed_response(text).unwrap();
        assert_eq!(response["status"], "completed");
        assert_eq!(response["model"], "gpt-5");
    }

    #[test]
    fn extractor_returns_none_without_terminal_event() {
        let text = "data: {\"type\":\"response.created\",\"response\":{}}\n\n";
        assert!(extract_completed_response(text).is_none());
    }
}
