//! Chat Completions ↔ Responses conversion.

use serde_json::{Value, json};

use super::{EMPTY_REQUEST_PLACEHOLDER, now_unix};
use crate::{
    convert::{
        reasoning::extract_reasoning,
        thinking::{Segment, ThinkingSegment, split_segments, thinking_xml_enabled},
        tools, usage,
    },
    protocol::{chat, responses},
};

/// Responses request → Chat Completions request.
///
/// `instructions` and any `system`-role input become the leading system
/// message; message items collapse into plain text messages.
pub fn request_responses_to_chat(request: &responses::ResponseRequest) -> chat::ChatCompletionRequest {
    let mut system_message: Option<String> = request.instructions.clone();
    let mut messages: Vec<chat::ChatMessage> = Vec::new();

    match &request.input {
        Some(responses::ResponseInput::Text(text)) => {
            messages.push(user_message(text.clone()));
        }
        Some(responses::ResponseInput::Items(items)) => {
            for item in items {
                let role = item.role.as_deref().unwrap_or("user");
                let text = item_text(item);

                if role == "system" {
                    if !text.is_empty() {
                        system_message = Some(text);
                    }
                } else {
                    let content = if text.is_empty() {
                        EMPTY_REQUEST_PLACEHOLDER.to_string()
                    } else {
                        text
                    };
                    messages.push(chat::ChatMessage {
                        role: parse_chat_role(role),
                        content: Some(chat::ChatContent::Text(content)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
        }
        None => {}
    }

    if let Some(system) = system_message {
        messages.insert(
            0,
            chat::ChatMessage {
                role: chat::ChatRole::System,
                content: Some(chat::ChatContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
            },
        );
    }

    if messages.is_empty() {
        messages.push(user_message(EMPTY_REQUEST_PLACEHOLDER.to_string()));
    }

    chat::ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_completion_tokens: request.max_output_tokens,
        max_tokens: None,
        tools: request.tools.as_deref().map(tools::responses_tools_to_chat).filter(|t| !t.is_empty()),
        tool_choice: request.tool_choice.as_ref().map(tools::responses_tool_choice_to_chat),
        parallel_tool_calls: request.parallel_tool_calls,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: None,
        reasoning_effort: request
            .reasoning
            .as_ref()
            .and_then(|r| r.effort.clone())
            .filter(|e| !e.is_empty()),
        response_format: None,
        unknown_fields: Default::default(),
    }
}

/// Chat Completions request → Responses request.
///
/// The first system message is hoisted to `instructions`; the last user
/// message becomes the input item. `reasoning_effort` is promoted to a
/// reasoning config; when absent and thinking serialization is enabled, a
/// `medium` effort is requested so the upstream produces summaries.
pub fn request_chat_to_responses(request: &chat::ChatCompletionRequest) -> responses::ResponseRequest {
    let instructions = request
        .messages
        .iter()
        .find(|m| matches!(m.role, chat::ChatRole::System | chat::ChatRole::Developer))
        .and_then(|m| m.content.as_ref())
        .map(|c| c.as_text())
        .filter(|t| !t.is_empty());

    let user_text = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == chat::ChatRole::User)
        .and_then(|m| m.content.as_ref())
        .map(|c| c.as_text());

    let input = user_text.filter(|t| !t.is_empty()).map(|text| {
        responses::ResponseInput::Items(vec![message_input_item("user", &text)])
    });

    let reasoning = request
        .reasoning_effort
        .clone()
        .filter(|e| !e.is_empty())
        .or_else(|| thinking_xml_enabled().then(|| "medium".to_string()))
        .map(|effort| responses::ReasoningConfig {
            effort: Some(effort),
            summary: Some("auto".to_string()),
        });

    responses::ResponseRequest {
        model: request.model.clone(),
        input,
        instructions,
        max_output_tokens: request.output_token_limit(),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        tools: request.tools.as_deref().map(tools::chat_tools_to_responses).filter(|t| !t.is_empty()),
        tool_choice: request.tool_choice.as_ref().map(tools::chat_tool_choice_to_responses),
        parallel_tool_calls: request.parallel_tool_calls,
        reasoning,
        text: request.response_format.as_ref().and_then(response_format_to_text),
        unknown_fields: Default::default(),
    }
}

/// Responses response → Chat Completions response.
///
/// Reasoning items serialize into the assistant text as `<thinking>` XML
/// (deduplicated by signature and text); function calls become
/// `tool_calls` with string-encoded arguments.
pub fn response_responses_to_chat(response: &responses::ResponseObject) -> chat::ChatCompletionResponse {
    let mut text_segments: Vec<String> = Vec::new();
    let mut added_reasoning: std::collections::HashSet<(String, String)> = Default::default();
    let mut tool_calls: Vec<chat::ToolCall> = Vec::new();

    for item in &response.output {
        match item {
            responses::OutputItem::Reasoning { .. } => {
                if !thinking_xml_enabled() {
                    continue;
                }

                let payload = serde_json::to_value(item).unwrap_or(Value::Null);
                for segment in extract_reasoning(&payload) {
                    let key = (segment.signature.clone().unwrap_or_default(), segment.text.clone());
                    if added_reasoning.insert(key) {
                        text_segments.push(segment.to_xml());
                    }
                }
            }
            responses::OutputItem::Message { content, .. } => {
                let text: String = content
                    .iter()
                    .filter_map(|part| match part {
                        responses::OutputContent::OutputText { text } => Some(text.as_str()),
                        responses::OutputContent::Unknown(_) => None,
                    })
                    .collect();
                if !text.is_empty() {
                    text_segments.push(text);
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

                tool_calls.push(chat::ToolCall {
                    id: id
                        .clone()
                        .or_else(|| call_id.clone())
                        .unwrap_or_else(|| format!("call_{}", tool_calls.len())),
                    r#type: chat::ToolType::Function,
                    function: chat::FunctionCall {
                        name,
                        arguments: arguments_to_string(arguments.as_ref()),
                    },
                });
            }
            responses::OutputItem::Unknown(_) => {}
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        chat::FinishReason::ToolCalls
    } else if response.status == responses::ResponseStatus::Incomplete {
        chat::FinishReason::Length
    } else {
        chat::FinishReason::Stop
    };

    chat::ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: response.created_at,
        model: response.model.clone(),
        choices: vec![chat::ChatChoice {
            index: 0,
            message: chat::ResponseMessage {
                role: chat::ChatRole::Assistant,
                content: Some(text_segments.concat()),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason),
        }],
        usage: response
            .usage
            .as_ref()
            .map(usage::responses_to_chat)
            .unwrap_or_default(),
        unknown_fields: Default::default(),
    }
}

/// Chat Completions response → Responses response.
///
/// Assistant text is split on `<thinking>` runs: text runs become message
/// outputs, thinking runs become reasoning outputs with per-part
/// signatures, and tool calls append function-call outputs.
pub fn response_chat_to_responses(response: &chat::ChatCompletionResponse) -> responses::ResponseObject {
    let first_choice = response.choices.first();

    let content_text = first_choice
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();

    let mut output: Vec<responses::OutputItem> = Vec::new();
    let mut reasoning_summary: Vec<Value> = Vec::new();
    let mut message_buffer = String::new();
    let mut message_counter = 0usize;

    let flush_message = |buffer: &mut String, counter: &mut usize, output: &mut Vec<responses::OutputItem>| {
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

    for segment in split_segments(&content_text) {
        match segment {
            Segment::Text(text) => message_buffer.push_str(&text),
            Segment::Thinking(ThinkingSegment { text, signature }) => {
                flush_message(&mut message_buffer, &mut message_counter, &mut output);

                let mut entry = json!({"type": "summary_text", "text": text});
                if let Some(signature) = signature.filter(|s| !s.is_empty()) {
                    entry["signature"] = Value::String(signature);
                }

                output.push(responses::OutputItem::Reasoning {
                    id: Some(format!("reasoning_{}_{}", response.id, reasoning_summary.len())),
                    status: Some("completed".to_string()),
                    summary: vec![entry.clone()],
                });
                reasoning_summary.push(entry);
            }
        }
    }

    flush_message(&mut message_buffer, &mut message_counter, &mut output);

    if output.is_empty() {
        output.push(responses::OutputItem::Message {
            id: Some(format!("msg_{}_0", response.id)),
            status: Some("completed".to_string()),
            role: "assistant".to_string(),
            content: vec![responses::OutputContent::OutputText { text: String::new() }],
        });
    }

    if let Some(tool_calls) = first_choice.and_then(|choice| choice.message.tool_calls.as_ref()) {
        for tool_call in tool_calls {
            output.push(responses::OutputItem::FunctionCall {
                id: Some(tool_call.id.clone()),
                call_id: Some(tool_call.id.clone()),
                status: Some("completed".to_string()),
                name: Some(tool_call.function.name.clone()),
                arguments: Some(Value::String(tool_call.function.arguments.clone())),
            });
        }
    }

    responses::ResponseObject {
        id: if response.id.is_empty() {
            "resp-unknown".to_string()
        } else {
            response.id.clone()
        },
        object: "response".to_string(),
        created_at: now_unix(),
        status: responses::ResponseStatus::Completed,
        model: response.model.clone(),
        output,
        parallel_tool_calls: false,
        usage: Some(usage::chat_to_responses(&response.usage)),
        reasoning: (!reasoning_summary.is_empty()).then(|| json!({"summary": reasoning_summary})),
        tools: None,
        unknown_fields: Default::default(),
    }
}

fn user_message(text: String) -> chat::ChatMessage {
    chat::ChatMessage {
        role: chat::ChatRole::User,
        content: Some(chat::ChatContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn parse_chat_role(role: &str) -> chat::ChatRole {
    match role {
        "assistant" => chat::ChatRole::Assistant,
        "system" => chat::ChatRole::System,
        "developer" => chat::ChatRole::Developer,
        "tool" => chat::ChatRole::Tool,
        _ => chat::ChatRole::User,
    }
}

fn item_text(item: &responses::InputItem) -> String {
    match &item.content {
        Some(responses::InputItemContent::Text(text)) => text.clone(),
        Some(responses::InputItemContent::Parts(parts)) => {
            let texts: Vec<&str> = parts.iter().filter_map(|part| part.text()).filter(|t| !t.is_empty()).collect();

            if texts.is_empty() {
                // No plain text; keep the serialized parts so nothing is
                // silently dropped.
                serde_json::to_string(parts).unwrap_or_default()
            } else {
                texts.join(" ")
            }
        }
        None => String::new(),
    }
}

pub(super) fn message_input_item(role: &str, text: &str) -> responses::InputItem {
    serde_json::from_value(json!({
        "type": "message",
        "role": role,
        "content": [{"type": "input_text", "text": text}],
    }))
    .expect("static input item shape")
}

pub(super) fn arguments_to_string(arguments: Option<&Value>) -> String {
    match arguments {
        Some(Value::String(s)) => s.clone(),
        Some(value) => serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    }
}

fn response_format_to_text(format: &Value) -> Option<Value> {
    let kind = format.get("type").and_then(Value::as_str)?;

    match kind {
        "text" | "json_object" => Some(json!({"format": {"type": kind}})),
        "json_schema" => {
            let mut out = json!({"type": "json_schema"});
            if let Some(schema) = format.get("json_schema").and_then(Value::as_object) {
                for key in ["name", "schema", "strict", "$defs", "description"] {
                    if let Some(value) = schema.get(key) {
                        out[key] = value.clone();
                    }
                }
            }
            Some(json!({"format": out}))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_request(value: Value) -> responses::ResponseRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn instructions_become_leading_system_message() {
        let request = response_request(json!({
            "model": "gpt-5",
            "instructions": "Be terse.",
            "input": [
                {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]}
            ]
        }));

        let chat_request = request_responses_to_chat(&request);
        assert_eq!(chat_request.messages.len(), 2);
        assert_eq!(chat_request.messages[0].role, chat::ChatRole::System);
        assert_eq!(chat_request.messages[0].content.as_ref().unwrap().as_text(), "Be terse.");
        assert_eq!(chat_request.messages[1].content.as_ref().unwrap().as_text(), "hi");
    }

    #[test]
    fn string_input_becomes_user_message() {
        let request = response_request(json!({"model": "gpt-5", "input": "Hello"}));
        let chat_request = request_responses_to_chat(&request);

        assert_eq!(chat_request.messages.len(), 1);
        assert_eq!(chat_request.messages[0].role, chat::ChatRole::User);
    }

    #[test]
    fn reasoning_effort_promotes_to_reasoning_config() {
        let raw: chat::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_completion_tokens": 100,
            "reasoning_effort": "high"
        }))
        .unwrap();

        let request = request_chat_to_responses(&raw);
        let reasoning = request.reasoning.unwrap();
        assert_eq!(reasoning.effort.as_deref(), Some("high"));
        assert_eq!(reasoning.summary.as_deref(), Some("auto"));
        assert_eq!(request.max_output_tokens, Some(100));
    }

    #[test]
    fn response_reasoning_folds_into_thinking_xml() {
        let response: responses::ResponseObject = serde_json::from_value(json!({
            "id": "resp_1",
            "object": "response",
            "created_at": 5,
            "status": "completed",
            "model": "gpt-5",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": [
                    {"type": "summary_text", "text": "pondering", "signature": "sig-9"}
                ]},
                {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "Hi!"}]}
            ],
            "usage": {"input_tokens": 5, "output_tokens": 2, "total_tokens": 7}
        }))
        .unwrap();

        let chat_response = response_responses_to_chat(&response);
        let content = chat_response.choices[0].message.content.clone().unwrap();

        assert_eq!(content, r#"<thinking signature="sig-9">pondering</thinking>Hi!"#);
        assert_eq!(chat_response.usage.prompt_tokens, 5);
        assert_eq!(chat_response.usage.completion_tokens, 2);
        assert_eq!(chat_response.choices[0].finish_reason, Some(chat::FinishReason::Stop));
    }

    #[test]
    fn chat_response_with_thinking_splits_into_items() {
        let response: chat::ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-5",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "lead<thinking signature=\"s\">why</thinking>trail"
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
        .unwrap();

        let object = response_chat_to_responses(&response);

        let kinds: Vec<&str> = object
            .output
            .iter()
            .map(|item| match item {
                responses::OutputItem::Message { .. } => "message",
                responses::OutputItem::Reasoning { .. } => "reasoning",
                responses::OutputItem::FunctionCall { .. } => "function_call",
                responses::OutputItem::Unknown(_) => "unknown",
            })
            .collect();
        assert_eq!(kinds, ["message", "reasoning", "message"]);
        assert!(object.reasoning.is_some());
    }

    #[test]
    fn tool_calls_become_function_call_outputs_and_back() {
        let response: chat::ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-5",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"SF\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}
        }))
        .unwrap();

        let object = response_chat_to_responses(&response);
        let back = response_responses_to_chat(&object);

        let calls = back.choices[0].message.tool_calls.clone().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"location\":\"SF\"}");
        assert_eq!(back.choices[0].finish_reason, Some(chat::FinishReason::ToolCalls));
    }
}
