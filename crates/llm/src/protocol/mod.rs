//! Typed wire formats for the three supported protocols.
//!
//! Request types reject structurally invalid payloads at deserialization
//! time; response types tolerate unknown optional fields by preserving them
//! through [`UnknownFields`] so a translated payload survives a round trip.

pub mod anthropic;
pub mod chat;
pub mod responses;
mod unknown_fields;

pub use unknown_fields::UnknownFields;

use serde::{Deserialize, Serialize};

/// The wire formats a request or response can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Anthropic Messages (`POST /v1/messages`).
    AnthropicMessages,
    /// OpenAI Chat Completions (`POST /v1/chat/completions`).
    ChatCompletions,
    /// OpenAI Responses (`POST /v1/responses`).
    Responses,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnthropicMessages => f.write_str("anthropic_messages"),
            Self::ChatCompletions => f.write_str("chat_completions"),
            Self::Responses => f.write_str("responses"),
        }
    }
}
