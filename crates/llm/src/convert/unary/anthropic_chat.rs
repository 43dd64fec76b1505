//! Anthropic Messages ↔ Chat Completions conversion.

use serde_json::Value;

use super::{DEFAULT_MAX_TOKENS, now_unix};
use crate::{
    LlmError,
    convert::{
        thinking::{Segment, ThinkingSegment, split_segments, thinking_xml_enabled},
        tools, usage,
    },
    protocol::{anthropic, chat},
};

/// Chat Completions request → Anthropic Messages request.
///
/// System and developer messages collapse into the system prompt. An
/// assistant message is split on `<thinking>` runs into thinking and text
/// blocks; its tool calls become `tool_use` blocks. A `tool` role message
/// becomes a user message carrying a `tool_result` block.
pub fn request_chat_to_anthropic(request: &chat::ChatCompletionRequest) -> crate::Result<anthropic::CreateMessageRequest> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<anthropic::InputMessage> = Vec::new();

    for message in &request.messages {
        match message.role {
            chat::ChatRole::System | chat::ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            chat::ChatRole::User => {
                let text = message.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                messages.push(anthropic::InputMessage {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Text(text),
                });
            }
            chat::ChatRole::Assistant => {
                let mut blocks: Vec<anthropic::ContentBlock> = Vec::new();

                let text = message.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                for segment in split_segments(&text) {
                    match segment {
                        Segment::Text(text) if !text.is_empty() => {
                            blocks.push(anthropic::ContentBlock::Text { text });
                        }
                        Segment::Text(_) => {}
                        Segment::Thinking(ThinkingSegment { text, signature }) => {
                            blocks.push(anthropic::ContentBlock::Thinking {
                                thinking: text,
                                signature: signature.unwrap_or_default(),
                            });
                        }
                    }
                }

                if let Some(tool_calls) = &message.tool_calls {
                    for tool_call in tool_calls {
                        blocks.push(anthropic::ContentBlock::ToolUse {
                            id: tool_call.id.clone(),
                            name: tool_call.function.name.clone(),
                            input: parse_arguments(&tool_call.function.arguments),
                        });
                    }
                }

                if blocks.is_empty() {
                    blocks.push(anthropic::ContentBlock::Text { text: String::new() });
                }

                messages.push(anthropic::InputMessage {
                    role: anthropic::Role::Assistant,
                    content: anthropic::MessageContent::Blocks(blocks),
                });
            }
            chat::ChatRole::Tool => {
                let tool_use_id = message
                    .tool_call_id
                    .clone()
                    .ok_or_else(|| LlmError::InvalidRequest("tool message missing tool_call_id".to_string()))?;

                let content = message
                    .content
                    .as_ref()
                    .map(|c| Value::String(c.as_text()))
                    .unwrap_or(Value::Null);

                messages.push(anthropic::InputMessage {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error: None,
                    }]),
                });
            }
        }
    }

    Ok(anthropic::CreateMessageRequest {
        model: request.model.clone(),
        messages,
        system: (!system_parts.is_empty()).then(|| anthropic::SystemPrompt::Text(system_parts.join("\n"))),
        max_tokens: request.output_token_limit().unwrap_or(DEFAULT_MAX_TOKENS),
        tools: request.tools.as_deref().map(tools::chat_tools_to_anthropic).filter(|t| !t.is_empty()),
        tool_choice: request.tool_choice.as_ref().and_then(tools::chat_tool_choice_to_anthropic),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone().map(chat::StopSequences::into_vec),
        metadata: None,
        unknown_fields: Default::default(),
    })
}

/// Anthropic Messages request → Chat Completions request.
pub fn request_anthropic_to_chat(request: &anthropic::CreateMessageRequest) -> chat::ChatCompletionRequest {
    let mut messages: Vec<chat::ChatMessage> = Vec::new();

    if let Some(system) = &request.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(chat::ChatMessage {
                role: chat::ChatRole::System,
                content: Some(chat::ChatContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for message in &request.messages {
        match message.role {
            anthropic::Role::User => {
                let mut text_parts: Vec<String> = Vec::new();

                for block in message.content.blocks() {
                    match block {
                        anthropic::ContentBlock::Text { text } => text_parts.push(text),
                        anthropic::ContentBlock::ToolResult {
                            tool_use_id, content, ..
                        } => {
                            // Tool results surface as their own `tool` role
                            // message, preserving block order.
                            if !text_parts.is_empty() {
                                messages.push(text_message(chat::ChatRole::User, text_parts.concat()));
                                text_parts.clear();
                            }
                            messages.push(chat::ChatMessage {
                                role: chat::ChatRole::Tool,
                                content: Some(chat::ChatContent::Text(tool_result_text(&content))),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id),
                            });
                        }
                        _ => {}
                    }
                }

                if !text_parts.is_empty() {
                    messages.push(text_message(chat::ChatRole::User, text_parts.concat()));
                }
            }
            anthropic::Role::Assistant => {
                let mut text = String::new();
                let mut tool_calls: Vec<chat::ToolCall> = Vec::new();

                for block in message.content.blocks() {
                    match block {
                        anthropic::ContentBlock::Text { text: t } => text.push_str(&t),
                        anthropic::ContentBlock::Thinking { thinking, signature } => {
                            if thinking_xml_enabled() {
                                let signature = (!signature.is_empty()).then_some(signature);
                                text.push_str(&ThinkingSegment::new(thinking, signature).to_xml());
                            }
                        }
                        anthropic::ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(chat::ToolCall {
                                id,
                                r#type: chat::ToolType::Function,
                                function: chat::FunctionCall {
                                    name,
                                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                                },
                            });
                        }
                        _ => {}
                    }
                }

                messages.push(chat::ChatMessage {
                    role: chat::ChatRole::Assistant,
                    content: Some(chat::ChatContent::Text(text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
        }
    }

    chat::ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_completion_tokens: Some(request.max_tokens),
        max_tokens: None,
        tools: request.tools.as_deref().map(tools::anthropic_tools_to_chat).filter(|t| !t.is_empty()),
        tool_choice: request.tool_choice.as_ref().map(tools::anthropic_tool_choice_to_chat),
        parallel_tool_calls: None,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone().map(chat::StopSequences::Many),
        reasoning_effort: None,
        response_format: None,
        unknown_fields: Default::default(),
    }
}

/// Anthropic Messages response → Chat Completions response.
pub fn response_anthropic_to_chat(response: &anthropic::MessageResponse) -> chat::ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<chat::ToolCall> = Vec::new();

    for block in &response.content {
        match block {
            anthropic::ContentBlock::Text { text: t } => text.push_str(t),
            anthropic::ContentBlock::Thinking { thinking, signature } => {
                if thinking_xml_enabled() {
                    let signature = (!signature.is_empty()).then(|| signature.clone());
                    text.push_str(&ThinkingSegment::new(thinking.clone(), signature).to_xml());
                }
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(chat::ToolCall {
                    id: id.clone(),
                    r#type: chat::ToolType::Function,
                    function: chat::FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    chat::ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: now_unix(),
        model: response.model.clone(),
        choices: vec![chat::ChatChoice {
            index: 0,
            message: chat::ResponseMessage {
                role: chat::ChatRole::Assistant,
                content: Some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(stop_reason_to_finish(response.stop_reason.as_ref())),
        }],
        usage: usage::anthropic_to_chat(&response.usage),
        unknown_fields: Default::default(),
    }
}

/// Chat Completions response → Anthropic Messages response.
pub fn response_chat_to_anthropic(response: &chat::ChatCompletionResponse) -> anthropic::MessageResponse {
    let first_choice = response.choices.first();
    let mut content: Vec<anthropic::ContentBlock> = Vec::new();

    let text = first_choice
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();

    for segment in split_segments(&text) {
        match segment {
            Segment::Text(text) if !text.is_empty() => content.push(anthropic::ContentBlock::Text { text }),
            Segment::Text(_) => {}
            Segment::Thinking(ThinkingSegment { text, signature }) => {
                content.push(anthropic::ContentBlock::Thinking {
                    thinking: text,
                    signature: signature.unwrap_or_default(),
                });
            }
        }
    }

    if let Some(tool_calls) = first_choice.and_then(|choice| choice.message.tool_calls.as_ref()) {
        for tool_call in tool_calls {
            content.push(anthropic::ContentBlock::ToolUse {
                id: tool_call.id.clone(),
                name: tool_call.function.name.clone(),
                input: parse_arguments(&tool_call.function.arguments),
            });
        }
    }

    if content.is_empty() {
        content.push(anthropic::ContentBlock::Text { text: String::new() });
    }

    let stop_reason = first_choice
        .and_then(|choice| choice.finish_reason.as_ref())
        .map(finish_to_stop_reason);

    anthropic::MessageResponse {
        id: response.id.clone(),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model.clone(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: usage::chat_to_anthropic(&response.usage),
        unknown_fields: Default::default(),
    }
}

pub(crate) fn stop_reason_to_finish(reason: Option<&anthropic::StopReason>) -> chat::FinishReason {
    match reason {
        Some(anthropic::StopReason::EndTurn) | Some(anthropic::StopReason::StopSequence) | None => {
            chat::FinishReason::Stop
        }
        Some(anthropic::StopReason::MaxTokens) => chat::FinishReason::Length,
        Some(anthropic::StopReason::ToolUse) => chat::FinishReason::ToolCalls,
        Some(anthropic::StopReason::Refusal) => chat::FinishReason::ContentFilter,
        Some(anthropic::StopReason::Other(other)) => {
            log::warn!("Unknown Anthropic stop reason: {other}");
            chat::FinishReason::Other(other.clone())
        }
    }
}

pub(crate) fn finish_to_stop_reason(reason: &chat::FinishReason) -> anthropic::StopReason {
    match reason {
        chat::FinishReason::Stop => anthropic::StopReason::EndTurn,
        chat::FinishReason::Length => anthropic::StopReason::MaxTokens,
        chat::FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
        chat::FinishReason::ContentFilter => anthropic::StopReason::Refusal,
        chat::FinishReason::Other(other) => anthropic::StopReason::Other(other.clone()),
    }
}

pub(crate) fn parse_arguments(arguments: &str) -> Value {
    if arguments.is_empty() {
        return Value::Object(Default::default());
    }

    serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn text_message(role: chat::ChatRole, text: String) -> chat::ChatMessage {
    chat::ChatMessage {
        role,
        content: Some(chat::ChatContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}
