//! Token usage mappings between the three wire shapes.
//!
//! `input_tokens ↔ prompt_tokens`, `output_tokens ↔ completion_tokens`;
//! cached and reasoning detail fields default to zero when absent.

use crate::protocol::{anthropic, chat, responses};

pub fn responses_to_chat(usage: &responses::ResponseUsage) -> chat::CompletionUsage {
    let cached_tokens = usage
        .input_tokens_details
        .as_ref()
        .map(|d| d.cached_tokens)
        .unwrap_or_default();

    let reasoning_tokens = usage
        .output_tokens_details
        .as_ref()
        .map(|d| d.reasoning_tokens)
        .unwrap_or_default();

    chat::CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: Some(chat::PromptTokensDetails { cached_tokens }),
        completion_tokens_details: Some(chat::CompletionTokensDetails { reasoning_tokens }),
    }
}

pub fn chat_to_responses(usage: &chat::CompletionUsage) -> responses::ResponseUsage {
    let cached_tokens = usage
        .prompt_tokens_details
        .as_ref()
        .map(|d| d.cached_tokens)
        .unwrap_or_default();

    let reasoning_tokens = usage
        .completion_tokens_details
        .as_ref()
        .map(|d| d.reasoning_tokens)
        .unwrap_or_default();

    responses::ResponseUsage {
        input_tokens: usage.prompt_tokens,
        input_tokens_details: Some(responses::InputTokensDetails { cached_tokens }),
        output_tokens: usage.completion_tokens,
        output_tokens_details: Some(responses::OutputTokensDetails { reasoning_tokens }),
        total_tokens: usage.prompt_tokens + usage.completion_tokens,
    }
}

pub fn anthropic_to_chat(usage: &anthropic::Usage) -> chat::CompletionUsage {
    chat::CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: Some(chat::PromptTokensDetails {
            cached_tokens: usage.cache_read_input_tokens.unwrap_or_default(),
        }),
        completion_tokens_details: Some(chat::CompletionTokensDetails::default()),
    }
}

pub fn chat_to_anthropic(usage: &chat::CompletionUsage) -> anthropic::Usage {
    anthropic::Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: usage.prompt_tokens_details.as_ref().map(|d| d.cached_tokens),
        cache_creation_input_tokens: None,
        ..Default::default()
    }
}

pub fn anthropic_to_responses(usage: &anthropic::Usage) -> responses::ResponseUsage {
    responses::ResponseUsage {
        input_tokens: usage.input_tokens,
        input_tokens_details: Some(responses::InputTokensDetails {
            cached_tokens: usage.cache_read_input_tokens.unwrap_or_default(),
        }),
        output_tokens: usage.output_tokens,
        output_tokens_details: Some(responses::OutputTokensDetails::default()),
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

pub fn responses_to_anthropic(usage: &responses::ResponseUsage) -> anthropic::Usage {
    anthropic::Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_input_tokens: usage.input_tokens_details.as_ref().map(|d| d.cached_tokens),
        cache_creation_input_tokens: None,
        ..Default::default()
    }
}
