//! Streaming format converters.
//!
//! Each converter is a single-owner state machine: the pipeline feeds it
//! decoded upstream JSON events one at a time and forwards whatever frames
//! it produces, then calls [`StreamAdapter::finish`] when the upstream
//! closes. Converters never reorder output and emit token usage exactly
//! once, on the terminal event of the sink format.

mod anthropic_to_chat;
mod anthropic_to_responses;
mod chat_to_anthropic;
mod chat_to_responses;
mod responses_to_anthropic;
mod responses_to_chat;

pub use anthropic_to_chat::AnthropicToChat;
pub use anthropic_to_responses::AnthropicToResponses;
pub use chat_to_anthropic::ChatToAnthropic;
pub use chat_to_responses::ChatToResponses;
pub use responses_to_anthropic::ResponsesToAnthropic;
pub use responses_to_chat::ResponsesToChat;

use serde_json::Value;

/// One outgoing SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub struct OutFrame {
    /// SSE `event:` name; `None` emits a bare `data:` frame.
    pub event: Option<&'static str>,
    pub data: Value,
    /// Terminal error frame: the pipeline closes the stream after it,
    /// with no trailing frames and no `[DONE]`.
    pub is_error: bool,
}

impl OutFrame {
    pub fn new(event: Option<&'static str>, data: Value) -> Self {
        Self {
            event,
            data,
            is_error: false,
        }
    }

    /// An error frame: a bare `data:` JSON object, never an `event:` line.
    pub fn error(error: Value) -> Self {
        Self {
            event: None,
            data: error,
            is_error: true,
        }
    }
}

/// A per-request streaming converter.
pub trait StreamAdapter: Send {
    /// Feed one decoded upstream event.
    fn process(&mut self, event: Value) -> Vec<OutFrame>;

    /// Flush state when the upstream closes.
    fn finish(&mut self) -> Vec<OutFrame>;

    /// Whether the sink format terminates streams with `data: [DONE]`.
    fn emits_done_marker(&self) -> bool;
}

/// Deserialize an upstream event, forwarding error payloads verbatim and
/// dropping anything else that fails to parse.
///
/// Returns `Ok(typed)` for a usable event, `Err(Some(frame))` for an error
/// body to forward as the final frame, and `Err(None)` for a dropped
/// event.
pub(crate) fn decode_event<T: serde::de::DeserializeOwned>(event: Value) -> Result<T, Option<OutFrame>> {
    if event.get("error").is_some() {
        return Err(Some(OutFrame::error(event)));
    }

    match serde_json::from_value(event) {
        Ok(typed) => Ok(typed),
        Err(e) => {
            log::warn!("Dropping unparseable stream event: {e}");
            Err(None)
        }
    }
}

pub(crate) fn to_frame<T: serde::Serialize>(event_name: Option<&'static str>, payload: &T) -> Option<OutFrame> {
    match serde_json::to_value(payload) {
        Ok(data) => Some(OutFrame::new(event_name, data)),
        Err(e) => {
            log::error!("Failed to serialize stream frame: {e}");
            None
        }
    }
}
