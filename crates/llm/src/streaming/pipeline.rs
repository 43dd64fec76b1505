//! The live streaming pipeline.
//!
//! Drives an upstream SSE response through a stream adapter and back out
//! to the client: parse, convert, re-serialize, emitting hook events per
//! produced frame. The upstream status code and headers are preserved;
//! error bodies received before any stream bytes are forwarded verbatim.

use axum::body::{Body, Bytes};
use eventsource_stream::Eventsource as _;
use futures::StreamExt as _;
use http::{HeaderMap, StatusCode, header};
use serde_json::{Value, json};

use crate::{
    convert::stream::StreamAdapter,
    hooks::{HookContext, HookEvent, HookManager},
    sse,
};

/// Headers never copied from the upstream response.
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::CACHE_CONTROL,
];

/// Hook invoked with the upstream headers before any body bytes are read.
/// May swap the response adapter, e.g. when the upstream answered with
/// JSON instead of SSE.
pub type OnHeaders = Box<dyn FnOnce(&HeaderMap) -> Option<Box<dyn StreamAdapter>> + Send>;

pub struct StreamingPipeline {
    hooks: HookManager,
    provider: String,
    request_id: String,
}

impl StreamingPipeline {
    pub fn new(hooks: HookManager, provider: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            hooks,
            provider: provider.into(),
            request_id: request_id.into(),
        }
    }

    /// Stream the upstream response to the client.
    pub async fn run(
        self,
        upstream: reqwest::Response,
        mut adapter: Option<Box<dyn StreamAdapter>>,
        on_headers: Option<OnHeaders>,
    ) -> axum::response::Response {
        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();

        if let Some(on_headers) = on_headers
            && let Some(replacement) = on_headers(&upstream_headers)
        {
            adapter = Some(replacement);
        }

        let mut headers = filtered_headers(&upstream_headers);

        if status.as_u16() >= 400 {
            // Provider error envelope: forwarded unchanged, original
            // content type included.
            if let Some(content_type) = upstream_headers.get(header::CONTENT_TYPE) {
                headers.insert(header::CONTENT_TYPE, content_type.clone());
            }
            append_request_id(&mut headers, &self.request_id);

            let body = upstream.bytes().await.unwrap_or_default();
            return response_with(status, headers, Body::from(body));
        }

        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/event-stream"));
        append_request_id(&mut headers, &self.request_id);

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);

        tokio::spawn(drive_stream(
            upstream,
            adapter,
            self.hooks,
            self.provider,
            self.request_id,
            tx,
        ));

        let body_stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        response_with(status, headers, Body::from_stream(body_stream))
    }
}

async fn drive_stream(
    upstream: reqwest::Response,
    mut adapter: Option<Box<dyn StreamAdapter>>,
    hooks: HookManager,
    provider: String,
    request_id: String,
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut total_chunks: u64 = 0;
    let mut total_bytes: u64 = 0;
    let mut cancelled = false;
    let mut errored = false;

    emit_stream_hook(
        &hooks,
        HookEvent::ProviderStreamStart,
        &provider,
        json!({"request_id": request_id.clone()}),
    )
    .await;

    let mut events = upstream.bytes_stream().eventsource();

    'upstream: while let Some(event) = events.next().await {
        let frames: Vec<Bytes> = match event {
            Ok(event) => match adapter.as_mut() {
                Some(adapter) => {
                    if event.data == "[DONE]" {
                        // The upstream terminator is dropped; the sink
                        // format decides whether to emit its own.
                        continue;
                    }

                    let Some(value) = decode_json(&event.event, &event.data) else {
                        continue;
                    };

                    let produced = adapter.process(value);
                    errored = errored || produced.iter().any(|frame| frame.is_error);
                    produced
                        .iter()
                        .map(|frame| Bytes::from(sse::serialize_frame(frame)))
                        .collect()
                }
                // Identity chain: forward frames verbatim, terminator
                // included.
                None => vec![reserialize(&event.event, &event.data)],
            },
            Err(e) => {
                log::error!("Upstream stream error: {e}");
                errored = true;

                let error = json!({"error": {
                    "type": "service_unavailable_error",
                    "message": format!("upstream stream failed: {e}"),
                }});
                vec![Bytes::from(format!("data: {error}\n\n"))]
            }
        };

        for bytes in frames {
            total_chunks += 1;
            total_bytes += bytes.len() as u64;

            emit_stream_hook(
                &hooks,
                HookEvent::ProviderStreamChunk,
                &provider,
                json!({
                    "chunk_number": total_chunks,
                    "chunk_size": bytes.len(),
                    "request_id": request_id.clone(),
                }),
            )
            .await;

            if tx.send(Ok(bytes)).await.is_err() {
                cancelled = true;
                break 'upstream;
            }
        }

        if errored {
            // A single error chunk, then the stream closes. No [DONE].
            break;
        }
    }

    if !cancelled && !errored {
        if let Some(adapter) = adapter.as_mut() {
            for frame in adapter.finish() {
                let bytes = Bytes::from(sse::serialize_frame(&frame));
                total_chunks += 1;
                total_bytes += bytes.len() as u64;

                if tx.send(Ok(bytes)).await.is_err() {
                    cancelled = true;
                    break;
                }
            }

            if !cancelled && adapter.emits_done_marker() {
                let _ = tx.send(Ok(Bytes::from_static(sse::done_marker()))).await;
            }
        }
    }

    emit_stream_hook(
        &hooks,
        HookEvent::ProviderStreamEnd,
        &provider,
        json!({
            "request_id": request_id,
            "total_chunks": total_chunks,
            "total_bytes": total_bytes,
            "cancelled": cancelled,
        }),
    )
    .await;
}

/// Hook emission is best-effort; the manager already swallows individual
/// hook failures, so this only shields against panicking observers being
/// added later.
async fn emit_stream_hook(hooks: &HookManager, event: HookEvent, provider: &str, data: Value) {
    let Value::Object(data) = data else { return };
    let mut context = HookContext::new(event, data).with_provider(provider);
    hooks.emit_with_context(&mut context).await;
}

fn decode_json(event_name: &str, data: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(mut value) => {
            if !event_name.is_empty() && value.is_object() && value.get("type").is_none() {
                value["type"] = Value::String(event_name.to_string());
            }
            Some(value)
        }
        Err(e) => {
            log::warn!("Dropping undecodable upstream SSE event: {e}");
            None
        }
    }
}

/// Passthrough mode: re-serialize the upstream event as-is, preserving
/// its event name.
fn reserialize(event_name: &str, data: &str) -> Bytes {
    if event_name.is_empty() {
        Bytes::from(format!("data: {data}\n\n"))
    } else {
        Bytes::from(format!("event: {event_name}\ndata: {data}\n\n"))
    }
}

fn filtered_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in upstream {
        if HOP_BY_HOP.contains(name) || name == header::CONTENT_TYPE {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    headers
}

fn append_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = header::HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", value);
    }
}

fn response_with(status: StatusCode, headers: HeaderMap, body: Body) -> axum::response::Response {
    let mut response = axum::response::Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
