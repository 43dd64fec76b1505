//! OpenAI Responses API types.
//!
//! The Responses surface is item-oriented: a reply is a list of typed
//! output items (`message`, `reasoning`, `function_call`), and streaming is
//! a family of `response.*` events carrying a `sequence_number`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UnknownFields;

/// Request body for `POST /v1/responses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub model: String,

    /// Either a bare prompt string or a list of input items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponseInput>,

    /// System-level instructions, the analogue of a system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Items(Vec<InputItem>),
}

/// One input item. Kept loose on purpose: clients echo output items back as
/// input, so unmodeled fields must survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(default = "default_item_type")]
    pub r#type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<InputItemContent>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

fn default_item_type() -> String {
    "message".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItemContent {
    Text(String),
    Parts(Vec<InputPart>),
}

/// Content part inside an input item. Both `input_text` and plain `text`
/// spellings appear in the wild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    InputText { text: String },
    Text { text: String },
    OutputText { text: String },
    #[serde(untagged)]
    Unknown(Value),
}

impl InputPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::InputText { text } | Self::Text { text } | Self::OutputText { text } => Some(text),
            Self::Unknown(_) => None,
        }
    }
}

/// Tool definition: name, description, and parameters live at the top
/// level, unlike the nested Chat Completions shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub r#type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Tool selection: a mode string or a flat function reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Function { r#type: String, name: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Response object, unary or wrapped inside stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,

    /// Always `"response"`.
    pub object: String,

    pub created_at: u64,

    pub status: ResponseStatus,

    pub model: String,

    #[serde(default)]
    pub output: Vec<OutputItem>,

    #[serde(default)]
    pub parallel_tool_calls: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,

    /// Tools echoed from the request; used for streaming tool-name
    /// inference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

impl ResponseObject {
    /// Minimal in-progress object used in synthesized stream events.
    pub fn stub(id: impl Into<String>, model: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            id: id.into(),
            object: "response".to_string(),
            created_at: 0,
            status,
            model: model.into(),
            output: Vec::new(),
            parallel_tool_calls: false,
            usage: None,
            reasoning: None,
            tools: None,
            unknown_fields: UnknownFields::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

/// A typed output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        role: String,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default)]
        summary: Vec<Value>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
    #[serde(untagged)]
    Unknown(Value),
}

/// Token accounting in the Responses shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<InputTokensDetails>,

    #[serde(default)]
    pub output_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<OutputTokensDetails>,

    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u32,
}

/// Streaming event surface.
///
/// The `type` discriminator doubles as the SSE `event:` name, and every
/// serialized event carries a strictly increasing `sequence_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "response.created")]
    Created {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        response: ResponseObject,
    },

    #[serde(rename = "response.in_progress")]
    InProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        response: ResponseObject,
    },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default)]
        output_index: u32,
        item: OutputItem,
    },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "response.reasoning_summary_part.added")]
    ReasoningSummaryPartAdded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        part: Option<Value>,
    },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u32>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningSummaryTextDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Raw reasoning text stream, emitted by some upstreams instead of the
    /// summary form.
    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u32>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.reasoning_text.done")]
    ReasoningTextDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        #[serde(default)]
        output_index: u32,
        item: OutputItem,
    },

    #[serde(rename = "response.completed")]
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        response: ResponseObject,
    },

    #[serde(rename = "response.incomplete")]
    Incomplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        response: ResponseObject,
    },

    #[serde(rename = "response.failed")]
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
        response: ResponseObject,
    },

    #[serde(untagged)]
    Unknown(Value),
}

impl StreamEvent {
    /// The SSE `event:` name, mirroring the `type` discriminator.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Created { .. } => Some("response.created"),
            Self::InProgress { .. } => Some("response.in_progress"),
            Self::OutputItemAdded { .. } => Some("response.output_item.added"),
            Self::OutputTextDelta { .. } => Some("response.output_text.delta"),
            Self::OutputTextDone { .. } => Some("response.output_text.done"),
            Self::ReasoningSummaryPartAdded { .. } => Some("response.reasoning_summary_part.added"),
            Self::ReasoningSummaryTextDelta { .. } => Some("response.reasoning_summary_text.delta"),
            Self::ReasoningSummaryTextDone { .. } => Some("response.reasoning_summary_text.done"),
            Self::ReasoningTextDelta { .. } => Some("response.reasoning_text.delta"),
            Self::ReasoningTextDone { .. } => Some("response.reasoning_text.done"),
            Self::FunctionCallArgumentsDelta { .. } => Some("response.function_call_arguments.delta"),
            Self::FunctionCallArgumentsDone { .. } => Some("response.function_call_arguments.done"),
            Self::OutputItemDone { .. } => Some("response.output_item.done"),
            Self::Completed { .. } => Some("response.completed"),
            Self::Incomplete { .. } => Some("response.incomplete"),
            Self::Failed { .. } => Some("response.failed"),
            Self::Unknown(_) => None,
        }
    }

    /// Stamp the sequence number on an already-built event.
    pub fn with_sequence_number(mut self, n: u64) -> Self {
        match &mut self {
            Self::Created { sequence_number, .. }
            | Self::InProgress { sequence_number, .. }
            | Self::OutputItemAdded { sequence_number, .. }
            | Self::OutputTextDelta { sequence_number, .. }
            | Self::OutputTextDone { sequence_number, .. }
            | Self::ReasoningSummaryPartAdded { sequence_number, .. }
            | Self::ReasoningSummaryTextDelta { sequence_number, .. }
            | Self::ReasoningSummaryTextDone { sequence_number, .. }
            | Self::ReasoningTextDelta { sequence_number, .. }
            | Self::ReasoningTextDone { sequence_number, .. }
            | Self::FunctionCallArgumentsDelta { sequence_number, .. }
            | Self::FunctionCallArgumentsDone { sequence_number, .. }
            | Self::OutputItemDone { sequence_number, .. }
            | Self::Completed { sequence_number, .. }
            | Self::Incomplete { sequence_number, .. }
            | Self::Failed { sequence_number, .. } => *sequence_number = Some(n),
            Self::Unknown(_) => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_accepts_string_shortcut() {
        let raw = r#"{"model": "gpt-5", "input": "Hello"}"#;
        let request: ResponseRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(request.input, Some(ResponseInput::Text(ref t)) if t == "Hello"));
    }

    #[test]
    fn output_items_discriminate_on_type() {
        let raw = r#"[
            {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "hi"}]},
            {"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "thinking"}]},
            {"type": "function_call", "id": "call_1", "name": "get_weather", "arguments": "{}"}
        ]"#;

        let items: Vec<OutputItem> = serde_json::from_str(raw).unwrap();
        assert!(matches!(items[0], OutputItem::Message { .. }));
        assert!(matches!(items[1], OutputItem::Reasoning { .. }));
        assert!(matches!(
            &items[2],
            OutputItem::FunctionCall { name: Some(name), .. } if name == "get_weather"
        ));
    }

    #[test]
    fn stream_event_type_matches_event_name() {
        let raw = r#"{"type": "response.output_text.delta", "sequence_number": 3, "item_id": "msg_1", "delta": "he"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(event.event_name(), Some("response.output_text.delta"));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "response.output_text.delta");
        assert_eq!(value["sequence_number"], 3);
    }

    #[test]
    fn unknown_event_round_trips() {
        let raw = r#"{"type": "response.audio.delta", "delta": "zzz"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, StreamEvent::Unknown(_)));
        assert_eq!(event.event_name(), None);
    }
}
