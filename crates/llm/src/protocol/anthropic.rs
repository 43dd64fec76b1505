//! Anthropic Messages API types.
//!
//! Request and response shapes for `POST /v1/messages` as documented in the
//! [Anthropic API Reference](https://docs.anthropic.com/en/api/messages),
//! plus the streaming event surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UnknownFields;

/// Request body for creating a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    /// Model identifier, e.g. `claude-sonnet-4-20250514`.
    pub model: String,

    /// Conversation turns, alternating user and assistant.
    pub messages: Vec<InputMessage>,

    /// System prompt, either a plain string or a list of text blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Hard output token limit. Required by the API.
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Custom stop sequences. Order is preserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// System prompt accepted as a string or as content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    /// Concatenated text of the prompt.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// Conversational role. Tool results ride inside `user` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content, either a bare string or typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }
}

/// A typed fragment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// A tool invocation requested by the model.
    ToolUse { id: String, name: String, input: Value },

    /// The result of a client-side tool execution.
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// Extended thinking. `signature` is an opaque server-issued string
    /// that must round-trip unchanged.
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },

    /// Image input.
    Image { source: Value },

    /// Forward-compatible fallback for unmodeled block kinds.
    #[serde(untagged)]
    Unknown(Value),
}

/// Tool definition: JSON schema under `input_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input_schema: Value,
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    None,
    Tool { name: String },
}

/// Response body of a successful message creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Message identifier, `msg_{alphanumeric}`.
    pub id: String,

    /// Always `"message"`.
    pub r#type: String,

    /// Always `"assistant"`.
    pub role: String,

    /// The model that handled the request.
    pub model: String,

    /// Ordered content blocks of the reply.
    pub content: Vec<ContentBlock>,

    #[serde(default)]
    pub stop_reason: Option<StopReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,

    pub usage: Usage,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Why generation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    /// Forward-compatible fallback, keeps the original string.
    #[serde(untagged)]
    Other(String),
}

/// Token accounting for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Omitted in streaming `message_delta` events.
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Error payload used both in HTTP error bodies and `error` stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub r#type: String,
    pub message: String,
}

/// Streaming event surface.
///
/// Streams begin with `message_start`, carry one or more content block
/// lifecycles (`content_block_start` → `content_block_delta*` →
/// `content_block_stop`), report final metadata in `message_delta`, and end
/// with `message_stop`. `ping` may appear anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart { message: MessageStart },
    ContentBlockStart { index: u32, content_block: ContentBlock },
    ContentBlockDelta { index: u32, delta: BlockDelta },
    ContentBlockStop { index: u32 },
    MessageDelta {
        delta: MessageDeltaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    MessageStop,
    Ping,
    Error { error: ApiError },
    /// Future event kinds forwarded as-is.
    #[serde(untagged)]
    Unknown(Value),
}

impl StreamEvent {
    /// The SSE `event:` name this event serializes under.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::MessageStart { .. } => Some("message_start"),
            Self::ContentBlockStart { .. } => Some("content_block_start"),
            Self::ContentBlockDelta { .. } => Some("content_block_delta"),
            Self::ContentBlockStop { .. } => Some("content_block_stop"),
            Self::MessageDelta { .. } => Some("message_delta"),
            Self::MessageStop => Some("message_stop"),
            Self::Ping => Some("ping"),
            Self::Error { .. } => Some("error"),
            Self::Unknown(_) => None,
        }
    }
}

/// Payload of the `message_start` event. `content` is always empty; the
/// message body is built from deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStart {
    pub id: String,
    pub role: String,
    pub model: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Incremental update for one content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

/// Top-level changes reported near the end of a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_blocks_deserialize_by_discriminator() {
        let raw = r#"[
            {"type": "text", "text": "hello"},
            {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "SF"}},
            {"type": "thinking", "thinking": "hmm", "signature": "sig-1"}
        ]"#;

        let blocks: Vec<ContentBlock> = serde_json::from_str(raw).unwrap();

        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "hello"));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { name, .. } if name == "get_weather"));
        assert!(matches!(&blocks[2], ContentBlock::Thinking { signature, .. } if signature == "sig-1"));
    }

    #[test]
    fn unknown_block_kind_is_preserved() {
        let raw = r#"{"type": "server_tool_use", "id": "x"}"#;
        let block: ContentBlock = serde_json::from_str(raw).unwrap();

        assert!(matches!(&block, ContentBlock::Unknown(_)));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "server_tool_use");

        let round_tripped = serde_json::to_value(&block).unwrap();
        assert_eq!(round_tripped["id"], "x");
    }

    #[test]
    fn stream_events_carry_their_event_name() {
        let raw = r#"{"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(event.event_name(), Some("content_block_delta"));
        assert!(matches!(
            event,
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::TextDelta { .. }
            }
        ));
    }

    #[test]
    fn response_preserves_unknown_optional_fields() {
        let raw = r#"{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [{"type": "text", "text": "ok"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 1},
            "container": {"id": "c_1"}
        }"#;

        let response: MessageResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.unknown_fields.get("container").unwrap()["id"], "c_1");

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["container"]["id"], "c_1");
    }

    #[test]
    fn stop_reason_keeps_unknown_values() {
        let reason: StopReason = serde_json::from_str(r#""pause_turn""#).unwrap();
        assert_eq!(reason, StopReason::Other("pause_turn".to_string()));
    }
}
