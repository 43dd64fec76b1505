//! Stream-to-buffer conversion.
//!
//! Fulfills a unary client request from a streaming-only upstream: the
//! outgoing body is rewritten with `stream: true`, every chunk is
//! collected, and the buffered SSE is reassembled into the final response
//! object. Hook emission mirrors the live pipeline, flagged with
//! `buffered_mode` so observers can tell the two apart.

use axum::body::Bytes;
use futures::StreamExt as _;
use http::HeaderMap;
use serde_json::{Map, Value, json};

use crate::{
    LlmError,
    hooks::{HookContext, HookEvent, HookManager},
    sse::JsonEventStream,
};

/// A provider-supplied parser that extracts the final response object
/// from the buffered SSE text.
pub type SseExtractor = Box<dyn Fn(&str) -> Option<Value> + Send + Sync>;

pub struct BufferedStreaming {
    hooks: HookManager,
    provider: String,
    request_id: String,
    /// Apply Responses-shape normalization to the reassembled object.
    normalize_responses: bool,
}

impl BufferedStreaming {
    pub fn new(
        hooks: HookManager,
        provider: impl Into<String>,
        request_id: impl Into<String>,
        normalize_responses: bool,
    ) -> Self {
        Self {
            hooks,
            provider: provider.into(),
            request_id: request_id.into(),
            normalize_responses,
        }
    }

    /// Rewrite a request body to enable upstream streaming.
    ///
    /// An object body gets `stream: true`; anything else is wrapped with
    /// the original payload preserved under `original_data`.
    pub fn streaming_body(body: &[u8]) -> Vec<u8> {
        if body.is_empty() {
            return br#"{"stream":true}"#.to_vec();
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(mut object)) => {
                object.insert("stream".to_string(), Value::Bool(true));
                serde_json::to_vec(&Value::Object(object)).unwrap_or_else(|_| br#"{"stream":true}"#.to_vec())
            }
            Ok(other) => {
                let wrapped = json!({"stream": true, "original_data": other});
                serde_json::to_vec(&wrapped).unwrap_or_else(|_| br#"{"stream":true}"#.to_vec())
            }
            Err(e) => {
                log::warn!("Request body is not JSON, wrapping for streaming: {e}");
                br#"{"stream":true}"#.to_vec()
            }
        }
    }

    /// Collect the upstream stream and reassemble the final response.
    ///
    /// Error statuses (≥ 400) short-circuit with the body forwarded
    /// verbatim.
    pub async fn run(&self, upstream: reqwest::Response, extractor: Option<&SseExtractor>) -> crate::Result<Value> {
        let status = upstream.status();
        let headers = upstream.headers().clone();

        if status.as_u16() >= 400 {
            let body = upstream.bytes().await.unwrap_or_default();
            log::warn!(
                "Buffered streaming request failed with {status}: {}",
                String::from_utf8_lossy(&body[..body.len().min(500)])
            );

            return Err(LlmError::UpstreamResponse {
                status: status.as_u16(),
                content_type: content_type_of(&headers),
                body,
            });
        }

        self.emit(
            HookEvent::ProviderStreamStart,
            json!({"request_id": self.request_id.clone(), "buffered_mode": true}),
        )
        .await;

        let mut chunks: Vec<Bytes> = Vec::new();
        let mut total_bytes: u64 = 0;
        let mut stream = upstream.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                log::error!("Buffered stream read failed: {e}");
                LlmError::ServiceUnavailable(format!("upstream stream failed: {e}"))
            })?;

            total_bytes += chunk.len() as u64;

            self.emit(
                HookEvent::ProviderStreamChunk,
                json!({
                    "chunk_number": chunks.len() + 1,
                    "chunk_size": chunk.len(),
                    "request_id": self.request_id.clone(),
                    "buffered_mode": true,
                }),
            )
            .await;

            chunks.push(chunk);
        }

        self.emit(
            HookEvent::ProviderStreamEnd,
            json!({
                "request_id": self.request_id.clone(),
                "total_chunks": chunks.len(),
                "total_bytes": total_bytes,
                "buffered_mode": true,
            }),
        )
        .await;

        let content: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let text = String::from_utf8_lossy(&content).into_owned();

        let mut parsed = self.parse_buffered(&text, extractor);

        if let Some(usage) = extract_last_usage(&text)
            && let Some(object) = parsed.as_object_mut()
        {
            let missing = object
                .get("usage")
                .and_then(Value::as_object)
                .map(usage_is_zero)
                .unwrap_or(true);

            if missing {
                object.insert("usage".to_string(), usage);
            }
        }

        Ok(parsed)
    }

    /// Extraction order: provider parser, whole-body JSON, generic SSE
    /// scan keeping the last `data:` payload.
    fn parse_buffered(&self, text: &str, extractor: Option<&SseExtractor>) -> Value {
        if let Some(extractor) = extractor
            && let Some(value) = extractor(text)
        {
            return self.normalize(value);
        }

        if let Ok(value) = serde_json::from_str::<Value>(text.trim())
            && value.is_object()
        {
            return self.normalize(value);
        }

        if let Some(value) = last_data_payload(text) {
            return self.normalize(value);
        }

        log::warn!(
            "Could not reassemble buffered stream, returning raw preview (request {})",
            self.request_id
        );

        json!({
            "error": "Failed to parse streaming response",
            "raw_content": text.chars().take(1000).collect::<String>(),
        })
    }

    fn normalize(&self, value: Value) -> Value {
        // Some upstreams wrap the final object under "response".
        let target = match value {
            Value::Object(mut object) => match object.remove("response") {
                Some(Value::Object(inner)) => Value::Object(inner),
                Some(other) => other,
                None => Value::Object(object),
            },
            other => other,
        };

        if self.normalize_responses {
            normalize_response_object(target)
        } else {
            target
        }
    }

    async fn emit(&self, event: HookEvent, data: Value) {
        let Value::Object(data) = data else { return };
        let mut context = HookContext::new(event, data).with_provider(&self.provider);
        self.hooks.emit_with_context(&mut context).await;
    }
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Generic fallback: scan the SSE text and keep the last decodable
/// `data:` payload.
fn last_data_payload(text: &str) -> Option<Value> {
    let mut stream = JsonEventStream::new();
    let mut values = stream.feed(text.as_bytes());
    values.extend(stream.finish());
    values.pop()
}

/// Normalize a reassembled payload into the Responses shape: at least one
/// assistant message output, reasoning summaries folded into text, and
/// required top-level and usage fields defaulted.
fn normalize_response_object(value: Value) -> Value {
    let Value::Object(mut object) = value else {
        return value;
    };

    if let Some(Value::Array(outputs)) = object.get("output") {
        let mut normalized: Vec<Value> = Vec::new();

        for item in outputs {
            let Some(item_object) = item.as_object() else { continue };

            match item_object.get("type").and_then(Value::as_str) {
                Some("message") => normalized.push(normalize_message_item(item_object)),
                Some("reasoning") => {
                    let texts: Vec<&str> = item_object
                        .get("summary")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .filter_map(|part| part.get("text").and_then(Value::as_str))
                                .filter(|t| !t.is_empty())
                                .collect()
                        })
                        .unwrap_or_default();

                    if !texts.is_empty() {
                        normalized.push(json!({
                            "type": "message",
                            "id": item_object.get("id").cloned().unwrap_or(json!("msg_reasoning")),
                            "status": item_object.get("status").cloned().unwrap_or(json!("completed")),
                            "role": "assistant",
                            "content": [{"type": "output_text", "text": texts.join(" ")}],
                        }));
                    }
                }
                _ => normalized.push(item.clone()),
            }
        }

        if normalized.iter().any(|item| item["type"] == "message") {
            object.insert("output".to_string(), Value::Array(normalized));
        } else {
            object.insert(
                "output".to_string(),
                json!([{
                    "type": "message",
                    "id": object.get("id").cloned().unwrap_or(json!("msg_assistant")),
                    "status": "completed",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": ""}],
                }]),
            );
        }
    }

    for (key, default) in [
        ("object", json!("response")),
        ("status", json!("completed")),
        ("parallel_tool_calls", json!(false)),
        ("created_at", json!(jiff::Timestamp::now().as_second())),
        ("id", json!("resp-buffered")),
        ("model", json!("")),
    ] {
        object.entry(key).or_insert(default);
    }

    let usage = object.entry("usage").or_insert(json!({}));
    if let Some(usage) = usage.as_object_mut() {
        if !usage.contains_key("input_tokens") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            usage.insert("input_tokens".to_string(), json!(prompt));
        }
        if !usage.contains_key("output_tokens") {
            let completion = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
            usage.insert("output_tokens".to_string(), json!(completion));
        }

        let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        usage.entry("total_tokens").or_insert(json!(input + output));
        usage
            .entry("input_tokens_details")
            .or_insert(json!({"cached_tokens": 0}));
        usage
            .entry("output_tokens_details")
            .or_insert(json!({"reasoning_tokens": 0}));
    }

    Value::Object(object)
}

fn normalize_message_item(item: &Map<String, Value>) -> Value {
    let mut normalized = item.clone();
    normalized.insert("type".to_string(), json!("message"));
    normalized.entry("status").or_insert(json!("completed"));
    normalized.entry("role").or_insert(json!("assistant"));
    normalized.entry("id").or_insert(json!("msg_assistant"));

    let content = match normalized.get("content") {
        Some(Value::Array(parts)) => {
            let fixed: Vec<Value> = parts
                .iter()
                .filter_map(|part| match part {
                    Value::Object(object) if object.get("type") == Some(&json!("output_text")) => {
                        let text = object.get("text").and_then(Value::as_str).unwrap_or_default();
                        Some(json!({"type": "output_text", "text": text}))
                    }
                    Value::String(text) => Some(json!({"type": "output_text", "text": text})),
                    _ => None,
                })
                .collect();

            if fixed.is_empty() {
                json!([{"type": "output_text", "text": ""}])
            } else {
                Value::Array(fixed)
            }
        }
        Some(Value::String(text)) => json!([{"type": "output_text", "text": text}]),
        _ => json!([{"type": "output_text", "text": ""}]),
    };

    normalized.insert("content".to_string(), content);
    Value::Object(normalized)
}

/// Scan every `data:` payload for the last `usage` object (top level or
/// under `response`), normalized to the Responses key names.
fn extract_last_usage(text: &str) -> Option<Value> {
    let mut stream = JsonEventStream::new();
    let mut values = stream.feed(text.as_bytes());
    values.extend(stream.finish());

    let mut last_usage: Option<Value> = None;

    for value in values {
        let usage = value
            .get("usage")
            .or_else(|| value.get("response").and_then(|r| r.get("usage")));

        if let Some(usage) = usage.filter(|u| u.is_object()) {
            last_usage = Some(usage.clone());
        }
    }

    let usage = last_usage?;

    let (input, output) = if usage.get("input_tokens").is_some() || usage.get("output_tokens").is_some() {
        (
            usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        )
    } else if usage.get("prompt_tokens").is_some() || usage.get("completion_tokens").is_some() {
        (
            usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        )
    } else {
        return None;
    };

    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input + output);

    Some(json!({
        "input_tokens": input,
        "output_tokens": output,
        "total_tokens": total,
    }))
}

fn usage_is_zero(usage: &Map<String, Value>) -> bool {
    let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    input == 0 && output == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_body_gets_stream_flag() {
        let body = BufferedStreaming::streaming_body(br#"{"model": "gpt-5", "stream": false}"#);
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["stream"], true);
        assert_eq!(value["model"], "gpt-5");
    }

    #[test]
    fn non_object_body_is_wrapped_under_original_data() {
        let body = BufferedStreaming::streaming_body(br#"[1, 2, 3]"#);
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["stream"], true);
        assert_eq!(value["original_data"], json!([1, 2, 3]));
    }

    #[test]
    fn empty_body_becomes_minimal_streaming_request() {
        let body = BufferedStreaming::streaming_body(b"");
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"stream": true}));
    }

    #[test]
    fn generic_scan_keeps_last_payload() {
        let text = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n";
        assert_eq!(last_data_payload(text), Some(json!({"b": 2})));
    }

    #[test]
    fn usage_extraction_finds_the_last_usage_and_normalizes_keys() {
        let text = concat!(
            "data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n",
            "data: {\"response\":{\"usage\":{\"input_tokens\":7,\"output_tokens\":3}}}\n\n",
        );

        let usage = extract_last_usage(text).unwrap();
        assert_eq!(usage, json!({"input_tokens": 7, "output_tokens": 3, "total_tokens": 10}));
    }

    #[test]
    fn normalization_folds_reasoning_and_defaults_usage() {
        let value = json!({
            "id": "resp_1",
            "model": "gpt-5",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "mull"}]},
            ]
        });

        let normalized = normalize_response_object(value);

        assert_eq!(normalized["object"], "response");
        assert_eq!(normalized["status"], "completed");
        assert_eq!(normalized["output"][0]["type"], "message");
        assert_eq!(normalized["output"][0]["content"][0]["text"], "mull");
        assert_eq!(normalized["usage"]["input_tokens"], 0);
        assert_eq!(normalized["usage"]["input_tokens_details"]["cached_tokens"], 0);
    }

    #[test]
    fn normalization_guarantees_an_assistant_message() {
        let value = json!({"id": "resp_2", "model": "gpt-5", "output": [{"type": "web_search_call"}]});

        let normalized = normalize_response_object(value);
        assert_eq!(normalized["output"][0]["type"], "message");
        assert_eq!(normalized["output"][0]["role"], "assistant");
    }
}
