//! Anthropic Messages ↔ OpenAI Responses conversion.

use serde_json::{Value, json};

use super::{
    DEFAULT_MAX_TOKENS,
    anthropic_chat::parse_arguments,
    chat_responses::{arguments_to_string, message_input_item},
    now_unix,
};
use crate::{
    convert::{reasoning::extract_reasoning, tools, usage},
    protocol::{anthropic, responses},
};

/// Responses request → Anthropic Messages request.
///
/// `instructions` and system-role items form the system prompt; message
/// items map by role; `function_call` items become assistant `tool_use`
/// blocks and `function_call_output` items become user `tool_result`
/// blocks.
pub fn request_responses_to_anthropic(request: &responses::ResponseRequest) -> anthropic::CreateMessageRequest {
    let mut system: Option<String> = request.instructions.clone();
    let mut messages: Vec<anthropic::InputMessage> = Vec::new();

    match &request.input {
        Some(responses::ResponseInput::Text(text)) => {
            messages.push(anthropic::InputMessage {
                role: anthropic::Role::User,
                content: anthropic::MessageContent::Text(text.clone()),
            });
        }
        Some(responses::ResponseInput::Items(items)) => {
            for item in items {
                match item.r#type.as_str() {
                    "function_call" => {
                        let name = unknown_str(item, "name").unwrap_or_default();
                        let id = unknown_str(item, "call_id")
                            .or_else(|| unknown_str(item, "id"))
                            .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4()));
                        let input = unknown_str(item, "arguments")
                            .map(|raw| parse_arguments(&raw))
                            .unwrap_or_else(|| Value::Object(Default::default()));

                        messages.push(anthropic::InputMessage {
                            role: anthropic::Role::Assistant,
                            content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolUse {
                                id,
                                name,
                                input,
                            }]),
                        });
                    }
                    "function_call_output" => {
                        let tool_use_id = unknown_str(item, "call_id").unwrap_or_default();
                        let output = item
                            .unknown_fields
                            .get("output")
                            .cloned()
                            .unwrap_or(Value::Null);

                        messages.push(anthropic::InputMessage {
                            role: anthropic::Role::User,
                            content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                                tool_use_id,
                                content: output,
                                is_error: None,
                            }]),
                        });
                    }
                    _ => {
                        let role = item.role.as_deref().unwrap_or("user");
                        let text = item_text(item);

                        if role == "system" {
                            if !text.is_empty() {
                                system = Some(text);
                            }
                        } else if role == "tool" {
                            messages.push(anthropic::InputMessage {
                                role: anthropic::Role::User,
                                content: anthropic::MessageContent::Blocks(vec![
                                    anthropic::ContentBlock::ToolResult {
                                        tool_use_id: unknown_str(item, "tool_call_id").unwrap_or_default(),
                                        content: Value::String(text),
                                        is_error: None,
                                    },
                                ]),
                            });
                        } else {
                            let role = if role == "assistant" {
                                anthropic::Role::Assistant
                            } else {
                                anthropic::Role::User
                            };
                            messages.push(anthropic::InputMessage {
                                role,
                                content: anthropic::MessageContent::Text(text),
                            });
                        }
                    }
                }
            }
        }
        None => {}
    }

    anthropic::CreateMessageRequest {
        model: request.model.clone(),
        messages,
        system: system.map(anthropic::SystemPrompt::Text),
        max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        tools: request
            .tools
            .as_deref()
            .map(tools::responses_tools_to_anthropic)
            .filter(|t| !t.is_empty()),
        tool_choice: request
            .tool_choice
            .as_ref()
            .map(tools::responses_tool_choice_to_chat)
            .as_ref()
            .and_then(tools::chat_tool_choice_to_anthropic),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: None,
        metadata: None,
        unknown_fields: Default::default(),
    }
}

/// Anthropic Messages request → Responses request.
///
/// The system prompt becomes `instructions`; assistant `thinking` blocks
/// become reasoning input items; `tool_use` and `tool_result` blocks map
/// to `function_call` and `function_call_output` items.
pub fn request_anthropic_to_responses(request: &anthropic::CreateMessageRequest) -> responses::ResponseRequest {
    let mut items: Vec<responses::InputItem> = Vec::new();

    for message in &request.messages {
        let role = match message.role {
            anthropic::Role::User => "user",
            anthropic::Role::Assistant => "assistant",
        };

        let mut text_parts: Vec<String> = Vec::new();

        let flush_text = |parts: &mut Vec<String>, items: &mut Vec<responses::InputItem>| {
            if parts.is_empty() {
                return;
            }
            items.push(message_input_item(role, &parts.concat()));
            parts.clear();
        };

        for block in message.content.blocks() {
            match block {
                anthropic::ContentBlock::Text { text } => text_parts.push(text),
                anthropic::ContentBlock::Thinking { thinking, signature } => {
                    flush_text(&mut text_parts, &mut items);

                    let mut entry = json!({"type": "summary_text", "text": thinking});
                    if !signature.is_empty() {
                        entry["signature"] = Value::String(signature);
                    }

                    items.push(input_item(json!({
                        "type": "reasoning",
                        "summary": [entry],
                    })));
                }
                anthropic::ContentBlock::ToolUse { id, name, input } => {
                    flush_text(&mut text_parts, &mut items);
                    items.push(input_item(json!({
                        "type": "function_call",
                        "call_id": id,
                        "name": name,
                        "arguments": serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    })));
                }
                anthropic::ContentBlock::ToolResult {
                    tool_use_id, content, ..
                } => {
                    flush_text(&mut text_parts, &mut items);
                    items.push(input_item(json!({
                        "type": "function_call_output",
                        "call_id": tool_use_id,
                        "output": content,
                    })));
                }
                _ => {}
            }
        }

        flush_text(&mut text_parts, &mut items);
    }

    responses::ResponseRequest {
        model: request.model.clone(),
        input: (!items.is_empty()).then_some(responses::ResponseInput::Items(items)),
        instructions: request.system.as_ref().map(|s| s.as_text()).filter(|t| !t.is_empty()),
        max_output_tokens: Some(request.max_tokens),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        tools: request
            .tools
            .as_deref()
            .map(tools::anthropic_tools_to_responses)
            .filter(|t| !t.is_empty()),
        tool_choice: request
            .tool_choice
            .as_ref()
            .map(tools::anthropic_tool_choice_to_chat)
            .as_ref()
            .map(tools::chat_tool_choice_to_responses),
        parallel_tool_calls: None,
        reasoning: None,
        text: None,
        unknown_fields: Default::default(),
    }
}

/// Anthropic Messages response → Responses response.
pub fn response_anthropic_to_responses(response: &anthropic::MessageResponse) -> responses::ResponseObject {
    let mut output: Vec<responses::OutputItem> = Vec::new();
    let mut text_buffer = String::new();
    let mut message_counter = 0usize;
    let mut reasoning_counter = 0usize;

    let flush_text = |buffer: &mut String, counter: &mut usize, output: &mut Vec<responses::OutputItem>| {
        if buffer.is_empty() {
            return;
        }
        output.push(responses::OutputItem::Message {
            id: Some(format!("msg_{}_{counter}", response.id)),
            status: Some("completed".to_string()),
            role: "assistant".to_string(),
            content: vec![responses::OutputContent::OutputText {
                text: std::mem::take(buffer),
            }],
        });
        *counter += 1;
    };

    for block in &response.content {
        match block {
            anthropic::ContentBlock::Text { text } => text_buffer.push_str(text),
            anthropic::ContentBlock::Thinking { thinking, signature } => {
                flush_text(&mut text_buffer, &mut message_counter, &mut output);

                let mut entry = json!({"type": "summary_text", "text": thinking});
                if !signature.is_empty() {
                    entry["signature"] = Value::String(signature.clone());
                }

                output.push(responses::OutputItem::Reasoning {
                    id: Some(format!("reasoning_{}_{reasoning_counter}", response.id)),
                    status: Some("completed".to_string()),
                    summary: vec![entry],
                });
                reasoning_counter += 1;
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                flush_text(&mut text_buffer, &mut message_counter, &mut output);
                output.push(responses::OutputItem::FunctionCall {
                    id: Some(id.clone()),
                    call_id: Some(id.clone()),
                    status: Some("completed".to_string()),
                    name: Some(name.clone()),
                    arguments: Some(Value::String(
                        serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                    )),
                });
            }
            _ => {}
        }
    }

    flush_text(&mut text_buffer, &mut message_counter, &mut output);

    if output.is_empty() {
        output.push(responses::OutputItem::Message {
            id: Some(format!("msg_{}_0", response.id)),
            status: Some("completed".to_string()),
            role: "assistant".to_string(),
            content: vec![responses::OutputContent::OutputText { text: String::new() }],
        });
    }

    let status = match response.stop_reason {
        Some(anthropic::StopReason::MaxTokens) => responses::ResponseStatus::Incomplete,
        _ => responses::ResponseStatus::Completed,
    };

    responses::ResponseObject {
        id: response.id.clone(),
        object: "response".to_string(),
        created_at: now_unix(),
        status,
        model: response.model.clone(),
        output,
        parallel_tool_calls: false,
        usage: Some(usage::anthropic_to_responses(&response.usage)),
        reasoning: None,
        tools: None,
        unknown_fields: Default::default(),
    }
}

/// Responses response → Anthropic Messages response.
pub fn response_responses_to_anthropic(response: &responses::ResponseObject) -> anthropic::MessageResponse {
    let mut content: Vec<anthropic::ContentBlock> = Vec::new();
    let mut saw_tool_use = false;

    for item in &response.output {
        match item {
            responses::OutputItem::Reasoning { .. } => {
                let payload = serde_json::to_value(item).unwrap_or(Value::Null);
                for segment in extract_reasoning(&payload) {
                    content.push(anthropic::ContentBlock::Thinking {
                        thinking: segment.text,
                        signature: segment.signature.unwrap_or_default(),
                    });
                }
            }
            responses::OutputItem::Message { content: parts, .. } => {
                let text: String = parts
                    .iter()
                    .filter_map(|part| match part {
                        responses::OutputContent::OutputText { text } => Some(text.as_str()),
                        responses::OutputContent::Unknown(_) => None,
                    })
                    .collect();
                if !text.is_empty() {
                    content.push(anthropic::ContentBlock::Text { text });
                }
            }
            responses::OutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
                ..
            } => {
                let Some(name) = name.clone().filter(|n| !n.is_empty()) else {
                    continue;
                };
                saw_tool_use = true;
                content.push(anthropic::ContentBlock::ToolUse {
                    id: id
                        .clone()
                        .or_else(|| call_id.clone())
                        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                    name,
                    input: parse_arguments(&arguments_to_string(arguments.as_ref())),
                });
            }
            responses::OutputItem::Unknown(_) => {}
        }
    }

    if content.is_empty() {
        content.push(anthropic::ContentBlock::Text { text: String::new() });
    }

    let stop_reason = if saw_tool_use {
        anthropic::StopReason::ToolUse
    } else if response.status == responses::ResponseStatus::Incomplete {
        anthropic::StopReason::MaxTokens
    } else {
        anthropic::StopReason::EndTurn
    };

    anthropic::MessageResponse {
        id: response.id.clone(),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model.clone(),
        content,
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: response
            .usage
            .as_ref()
            .map(usage::responses_to_anthropic)
            .unwrap_or_default(),
        unknown_fields: Default::default(),
    }
}

fn input_item(value: Value) -> responses::InputItem {
    serde_json::from_value(value).expect("static input item shape")
}

fn unknown_str(item: &responses::InputItem, key: &str) -> Option<String> {
    item.unknown_fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn item_text(item: &responses::InputItem) -> String {
    match &item.content {
        Some(responses::InputItemContent::Text(text)) => text.clone(),
        Some(responses::InputItemContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| part.text())
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thinking_blocks_become_reasoning_items_and_back() {
        let response: anthropic::MessageResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "thinking", "thinking": "T", "signature": "S"},
                {"type": "text", "text": "answer"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 4, "output_tokens": 3}
        }))
        .unwrap();

        let object = response_anthropic_to_responses(&response);
        assert!(matches!(object.output[0], responses::OutputItem::Reasoning { .. }));
        assert!(matches!(object.output[1], responses::OutputItem::Message { .. }));

        let back = response_responses_to_anthropic(&object);
        assert_eq!(
            back.content[0],
            anthropic::ContentBlock::Thinking {
                thinking: "T".to_string(),
                signature: "S".to_string(),
            }
        );
        assert_eq!(back.usage.input_tokens, 4);
        assert_eq!(back.stop_reason, Some(anthropic::StopReason::EndTurn));
    }

    #[test]
    fn function_call_items_round_trip_as_tool_use() {
        let request: anthropic::CreateMessageRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 100,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "SF"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "72F"}
                ]}
            ]
        }))
        .unwrap();

        let responses_request = request_anthropic_to_responses(&request);
        let items = match &responses_request.input {
            Some(responses::ResponseInput::Items(items)) => items,
            other => unreachable!("expected input items, got {other:?}"),
        };
        assert_eq!(items[0].r#type, "function_call");
        assert_eq!(items[1].r#type, "function_call_output");

        let back = request_responses_to_anthropic(&responses_request);
        let first_blocks = back.messages[0].content.blocks();
        assert!(matches!(
            &first_blocks[0],
            anthropic::ContentBlock::ToolUse { name, .. } if name == "get_weather"
        ));
        let second_blocks = back.messages[1].content.blocks();
        assert!(matches!(
            &second_blocks[0],
            anthropic::ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_1"
        ));
    }

    #[test]
    fn incomplete_status_maps_to_max_tokens() {
        let object: responses::ResponseObject = serde_json::from_value(json!({
            "id": "resp_1",
            "object": "response",
            "created_at": 0,
            "status": "incomplete",
            "model": "gpt-5",
            "output": [
                {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "trunc"}]}
            ]
        }))
        .unwrap();

        let message = response_responses_to_anthropic(&object);
        assert_eq!(message.stop_reason, Some(anthropic::StopReason::MaxTokens));
    }

    #[test]
    fn system_prompt_becomes_instructions() {
        let request: anthropic::CreateMessageRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 50,
            "system": "stay focused",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let responses_request = request_anthropic_to_responses(&request);
        assert_eq!(responses_request.instructions.as_deref(), Some("stay focused"));
        assert_eq!(responses_request.max_output_tokens, Some(50));
    }
}
