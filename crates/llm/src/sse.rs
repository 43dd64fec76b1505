//! SSE codec: incremental parser and frame serializer.
//!
//! The live pipeline decodes upstream bytes with `eventsource-stream`;
//! this module provides the same semantics for buffered content (the
//! stream-to-buffer path) and the serializer used on the way out.

use serde_json::Value;

use crate::convert::stream::OutFrame;

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` line, if present.
    pub event: Option<String>,
    /// Joined `data:` payload.
    pub data: String,
}

/// Incremental SSE parser.
///
/// Events are delimited by a blank line. `event:` sets the event name and
/// multi-line `data:` values join with `\n`. Bytes after the last complete
/// event are held until more input arrives; [`SseParser::finish`] parses a
/// trailing fragment best-effort when the upstream closes.
#[derive(Debug, Default)]
pub struct SseParser {
    // Raw bytes: a chunk boundary may split a multi-byte character, so
    // decoding happens per completed event.
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, yielding all completed events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();

        while let Some(pos) = find_blank_line(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event(&String::from_utf8_lossy(&raw)) {
                events.push(event);
            }
        }

        events
    }

    /// Parse whatever is left in the buffer as a final event.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_event(&String::from_utf8_lossy(&rest))
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// SSE parser that decodes event payloads to JSON.
///
/// A `data: [DONE]` terminator ends the stream gracefully and is dropped.
/// Payloads that fail to decode are logged and dropped. When an event
/// carries an `event:` name but its JSON lacks a `type` discriminator, the
/// name is injected so downstream adapters can dispatch on it.
#[derive(Debug, Default)]
pub struct JsonEventStream {
    parser: SseParser,
    done: bool,
}

impl JsonEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `[DONE]` terminator was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Value> {
        let events = self.parser.feed(bytes);
        events.into_iter().filter_map(|event| self.decode(event)).collect()
    }

    pub fn finish(&mut self) -> Option<Value> {
        let event = self.parser.finish()?;
        self.decode(event)
    }

    fn decode(&mut self, event: SseEvent) -> Option<Value> {
        if self.done {
            return None;
        }

        if event.data == "[DONE]" {
            self.done = true;
            return None;
        }

        if event.data.is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(&event.data) {
            Ok(mut value) => {
                if let Some(name) = event.event
                    && value.is_object()
                    && value.get("type").is_none()
                {
                    value["type"] = Value::String(name);
                }
                Some(value)
            }
            Err(e) => {
                log::warn!("Dropping undecodable SSE event: {e}");
                None
            }
        }
    }
}

/// Serialize one outgoing frame.
///
/// Frames with an event name (Anthropic events, `response.*` events) get
/// an `event:` line; Chat chunks are `data:`-only.
pub fn serialize_frame(frame: &OutFrame) -> Vec<u8> {
    let json = sonic_rs::to_string(&frame.data).unwrap_or_else(|e| {
        log::error!("Failed to serialize SSE frame: {e}");
        r#"{"error":{"type":"internal_server_error","message":"serialization failed"}}"#.to_string()
    });

    match frame.event {
        Some(name) => format!("event: {name}\ndata: {json}\n\n").into_bytes(),
        None => format!("data: {json}\n\n").into_bytes(),
    }
}

/// The terminal marker for sinks that use one.
pub fn done_marker() -> &'static [u8] {
    b"data: [DONE]\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STREAM: &str = "event: message_start\ndata: {\"type\":\"message_start\",\"n\":1}\n\nevent: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"n\":2}\n\ndata: {\"n\":3}\n\ndata: [DONE]\n\n";

    #[test]
    fn whole_input_parses_events_in_order() {
        let mut parser = SseParser::new();
        let events = parser.feed(STREAM.as_bytes());

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[2].event, None);
        assert_eq!(events[3].data, "[DONE]");
    }

    #[test]
    fn any_byte_chunking_yields_the_same_events() {
        let reference = {
            let mut parser = SseParser::new();
            parser.feed(STREAM.as_bytes())
        };

        for chunk_size in [1, 2, 3, 7, 16, 64] {
            let mut parser = SseParser::new();
            let mut events = Vec::new();

            for chunk in STREAM.as_bytes().chunks(chunk_size) {
                events.extend(parser.feed(chunk));
            }
            events.extend(parser.finish());

            assert_eq!(events, reference, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line1\ndata: line2\n\n");

        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn trailing_fragment_parses_on_finish() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"partial\":true}").is_empty());

        let event = parser.finish().unwrap();
        assert_eq!(event.data, "{\"partial\":true}");
    }

    #[test]
    fn done_marker_terminates_the_json_stream() {
        let mut stream = JsonEventStream::new();
        let values = stream.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\ndata: {\"b\":2}\n\n");

        assert_eq!(values, vec![json!({"a": 1})]);
        assert!(stream.is_done());
    }

    #[test]
    fn invalid_json_is_dropped() {
        let mut stream = JsonEventStream::new();
        let values = stream.feed(b"data: not-json\n\ndata: {\"ok\":true}\n\n");

        assert_eq!(values, vec![json!({"ok": true})]);
    }

    #[test]
    fn event_name_is_injected_as_type() {
        let mut stream = JsonEventStream::new();
        let values = stream.feed(b"event: response.completed\ndata: {\"response\":{}}\n\n");

        assert_eq!(values[0]["type"], "response.completed");

        // An existing discriminator is left alone.
        let values = stream.feed(b"event: other\ndata: {\"type\":\"original\"}\n\n");
        assert_eq!(values[0]["type"], "original");
    }

    #[test]
    fn serializer_emits_event_line_only_when_named() {
        let named = OutFrame::new(Some("message_stop"), json!({"type": "message_stop"}));
        assert_eq!(
            serialize_frame(&named),
            b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_vec()
        );

        let bare = OutFrame::new(None, json!({"x": 1}));
        assert_eq!(serialize_frame(&bare), b"data: {\"x\":1}\n\n".to_vec());
    }
}
