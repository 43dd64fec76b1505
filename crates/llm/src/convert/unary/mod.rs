//! Unary request and response converters, one module per format pair.

mod anthropic_chat;
mod anthropic_responses;
mod chat_responses;

pub use anthropic_chat::{
    request_anthropic_to_chat, request_chat_to_anthropic, response_anthropic_to_chat, response_chat_to_anthropic,
};
pub(crate) use anthropic_chat::{finish_to_stop_reason, parse_arguments, stop_reason_to_finish};
pub use anthropic_responses::{
    request_anthropic_to_responses, request_responses_to_anthropic, response_anthropic_to_responses,
    response_responses_to_anthropic,
};
pub use chat_responses::{
    request_chat_to_responses, request_responses_to_chat, response_chat_to_responses, response_responses_to_chat,
};

/// Placeholder content for requests whose text could not be extracted;
/// upstreams reject empty messages outright.
pub(crate) const EMPTY_REQUEST_PLACEHOLDER: &str = "(empty request)";

/// Output token limit applied when a format that requires one (Anthropic)
/// is targeted by a request that does not set one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn now_unix() -> u64 {
    jiff::Timestamp::now().as_second().max(0) as u64
}
