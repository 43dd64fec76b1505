//! Per-request orchestration.
//!
//! The dispatcher is the entry point used by the HTTP layer: it validates
//! the client body, translates it through the format chain, authenticates
//! against the upstream, issues the call, and routes the reply through the
//! streaming pipeline, the stream-buffer adapter, or a plain unary
//! translation. Lifecycle hooks fire at every step.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Json,
    body::Bytes,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, header};
use serde_json::{Value, json};

use crate::{
    LlmError,
    convert::{self, FormatAdapter},
    hooks::{HookContext, HookEvent, HookManager},
    protocol::{WireFormat, chat},
    streaming::{BufferedStreaming, StreamingPipeline},
};

/// Header clients use to pin a session; propagated upstream as
/// `X-Session-ID`.
pub const SESSION_ID_HEADER: &str = "session_id";

/// Per-provider adapter contributed by a provider plugin: owns upstream
/// addressing, authentication headers, and the upstream wire format.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Route prefix this provider mounts under, e.g. `/claude`.
    fn route_prefix(&self) -> &str;

    fn upstream_format(&self) -> WireFormat;

    /// Whether the upstream serves unary requests directly. When false,
    /// unary clients are served through the stream-buffer adapter.
    fn supports_unary_upstream(&self) -> bool {
        true
    }

    /// Upstream endpoint for message creation.
    fn upstream_url(&self) -> String;

    /// Authentication and provider identification headers. The client's
    /// own `Authorization` header never reaches this; the dispatcher
    /// overlays it only when client auth forwarding is enabled.
    async fn upstream_headers(&self, session_id: Option<&str>) -> crate::Result<HeaderMap>;

    /// Model cards for `GET <prefix>/v1/models`.
    fn models(&self) -> chat::ModelsResponse;

    /// Provider-specific parser pulling the final response object out of
    /// buffered SSE.
    fn sse_extractor(&self) -> Option<crate::streaming::SseExtractor> {
        None
    }
}

pub struct ProxyDispatcher {
    provider: Arc<dyn ProviderAdapter>,
    hooks: HookManager,
    http: reqwest::Client,
    client_auth: bool,
    upstream_timeout: Duration,
}

impl ProxyDispatcher {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        hooks: HookManager,
        http: reqwest::Client,
        client_auth: bool,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            hooks,
            http,
            client_auth,
            upstream_timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ProviderAdapter> {
        &self.provider
    }

    /// Handle one client request in `client_format`.
    pub async fn dispatch(&self, client_format: WireFormat, headers: HeaderMap, body: Bytes) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = std::time::Instant::now();

        self.emit(
            HookEvent::RequestStarted,
            json!({
                "request_id": request_id.clone(),
                "method": "POST",
                "url": format!("{}{}", self.provider.route_prefix(), endpoint_path(client_format)),
                "headers": headers_sans_auth(&headers),
            }),
        )
        .await;

        match self.handle(client_format, &headers, &body, &request_id).await {
            Ok(response) => {
                self.emit(
                    HookEvent::RequestCompleted,
                    json!({
                        "request_id": request_id,
                        "status_code": response.status().as_u16(),
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;

                response
            }
            Err(error) => {
                self.emit(
                    HookEvent::RequestFailed,
                    json!({
                        "request_id": request_id,
                        "error_type": error.error_type(),
                        "error": error.to_string(),
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;

                error.into_response()
            }
        }
    }

    async fn handle(
        &self,
        client_format: WireFormat,
        headers: &HeaderMap,
        body: &Bytes,
        request_id: &str,
    ) -> crate::Result<Response> {
        let payload: Value = sonic_rs::from_slice(body)
            .map_err(|e| LlmError::InvalidRequest(format!("request body is not valid JSON: {e}")))?;

        let upstream_format = self.provider.upstream_format();
        let adapter = convert::adapter_for(client_format, upstream_format);

        let upstream_body = match &adapter {
            Some(adapter) => adapter.convert_request(&payload)?,
            None => convert::validate_request(client_format, &payload)?,
        };

        let stream_requested = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let upstream_headers = self.build_upstream_headers(headers).await?;
        let url = self.provider.upstream_url();

        self.emit(
            HookEvent::ProviderRequestSent,
            json!({
                "request_id": request_id,
                "url": url.clone(),
                "stream": stream_requested,
            }),
        )
        .await;

        if stream_requested {
            self.streamed(url, upstream_headers, upstream_body, &adapter, &payload, request_id)
                .await
        } else if self.provider.supports_unary_upstream() {
            self.unary(url, upstream_headers, upstream_body, &adapter, request_id).await
        } else {
            self.buffered(url, upstream_headers, upstream_body, &adapter, request_id)
                .await
        }
    }

    async fn streamed(
        &self,
        url: String,
        upstream_headers: HeaderMap,
        mut upstream_body: Value,
        adapter: &Option<FormatAdapter>,
        client_payload: &Value,
        request_id: &str,
    ) -> crate::Result<Response> {
        upstream_body["stream"] = Value::Bool(true);

        let upstream = self
            .http
            .post(&url)
            .headers(upstream_headers)
            .timeout(self.upstream_timeout)
            .json(&upstream_body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let stream_adapter = adapter.as_ref().map(|a| a.stream_adapter(client_payload));
        let pipeline = StreamingPipeline::new(self.hooks.clone(), self.provider.name(), request_id);

        // Inspected before any body bytes are read; an upstream that
        // answers JSON instead of SSE bypasses the stream converter so
        // the payload is forwarded rather than silently swallowed.
        let provider_name = self.provider.name().to_string();
        let on_headers: crate::streaming::OnHeaders = Box::new(move |upstream_headers| {
            let content_type = upstream_headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();

            if !content_type.is_empty() && !content_type.contains("text/event-stream") {
                log::warn!(
                    "Provider '{provider_name}' answered a streaming request with '{content_type}'"
                );
            }

            None
        });

        Ok(pipeline.run(upstream, stream_adapter, Some(on_headers)).await)
    }

    async fn unary(
        &self,
        url: String,
        upstream_headers: HeaderMap,
        upstream_body: Value,
        adapter: &Option<FormatAdapter>,
        request_id: &str,
    ) -> crate::Result<Response> {
        let upstream = self
            .http
            .post(&url)
            .headers(upstream_headers)
            .timeout(self.upstream_timeout)
            .json(&upstream_body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = upstream.status();

        if !status.is_success() {
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = upstream.bytes().await.unwrap_or_default();

            self.emit(
                HookEvent::ProviderError,
                json!({
                    "request_id": request_id,
                    "status_code": status.as_u16(),
                }),
            )
            .await;

            // Provider error envelopes travel back untouched.
            return Err(LlmError::UpstreamResponse {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        let value: Value = upstream.json().await.map_err(|e| {
            log::error!("Failed to read upstream response: {e}");
            LlmError::Internal(Some(format!("could not parse upstream response: {e}")))
        })?;

        self.emit(
            HookEvent::ProviderResponseReceived,
            json!({
                "request_id": request_id,
                "status_code": status.as_u16(),
            }),
        )
        .await;

        let client_value = match adapter {
            Some(adapter) => adapter.convert_response(&value)?,
            None => value,
        };

        Ok(Json(client_value).into_response())
    }

    async fn buffered(
        &self,
        url: String,
        upstream_headers: HeaderMap,
        upstream_body: Value,
        adapter: &Option<FormatAdapter>,
        request_id: &str,
    ) -> crate::Result<Response> {
        let body_bytes = serde_json::to_vec(&upstream_body).map_err(|e| {
            log::error!("Failed to serialize upstream body: {e}");
            LlmError::Internal(None)
        })?;
        let streaming_body = BufferedStreaming::streaming_body(&body_bytes);

        let upstream = self
            .http
            .post(&url)
            .headers(upstream_headers)
            .timeout(self.upstream_timeout)
            .body(streaming_body)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let buffer = BufferedStreaming::new(
            self.hooks.clone(),
            self.provider.name(),
            request_id,
            self.provider.upstream_format() == WireFormat::Responses,
        );

        let extractor = self.provider.sse_extractor();
        let value = buffer.run(upstream, extractor.as_ref()).await?;

        self.emit(
            HookEvent::ProviderResponseReceived,
            json!({
                "request_id": request_id,
                "buffered_mode": true,
            }),
        )
        .await;

        let client_value = match adapter {
            Some(adapter) => adapter.convert_response(&value)?,
            None => value,
        };

        Ok(Json(client_value).into_response())
    }

    async fn build_upstream_headers(&self, client_headers: &HeaderMap) -> crate::Result<HeaderMap> {
        let session_id = client_headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        let mut headers = self.provider.upstream_headers(session_id).await?;

        // Client auth only crosses the proxy when the deployment opts in.
        if self.client_auth
            && let Some(authorization) = client_headers.get(header::AUTHORIZATION)
        {
            headers.insert(header::AUTHORIZATION, authorization.clone());
        }

        Ok(headers)
    }

    fn connection_error(&self, error: reqwest::Error) -> LlmError {
        log::error!(
            "Failed to reach upstream for provider '{}': {error}",
            self.provider.name()
        );
        LlmError::from(error)
    }

    async fn emit(&self, event: HookEvent, data: Value) {
        let Value::Object(data) = data else { return };
        let mut context = HookContext::new(event, data).with_provider(self.provider.name());
        self.hooks.emit_with_context(&mut context).await;
    }
}

/// Endpoint path for a client-facing format, used in hook payloads.
fn endpoint_path(format: WireFormat) -> &'static str {
    match format {
        WireFormat::AnthropicMessages => "/v1/messages",
        WireFormat::ChatCompletions => "/v1/chat/completions",
        WireFormat::Responses => "/v1/responses",
    }
}

fn headers_sans_auth(headers: &HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .filter(|(name, _)| *name != header::AUTHORIZATION && *name != "x-api-key")
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or("<binary>").to_string()),
            )
        })
        .collect();

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_headers_are_redacted_from_hook_payloads() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        headers.insert("x-api-key", "sk-secret".parse().unwrap());
        headers.insert("session_id", "sess-1".parse().unwrap());

        let value = headers_sans_auth(&headers);

        assert!(value.get("authorization").is_none());
        assert!(value.get("x-api-key").is_none());
        assert_eq!(value["session_id"], "sess-1");
    }
}
