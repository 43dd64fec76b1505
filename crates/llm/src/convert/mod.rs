//! Bidirectional format conversion between the three wire formats.
//!
//! Unary converters are plain functions; streaming converters are
//! per-request state machines implementing [`stream::StreamAdapter`]. The
//! [`FormatAdapter`] bundle is what the plugin registry hands to the
//! dispatcher for a `(client format, upstream format)` pair.

pub mod reasoning;
pub mod stream;
pub mod thinking;
pub mod tools;
pub mod unary;
pub mod usage;

use serde_json::Value;

use crate::protocol::WireFormat;

/// A registered translation between a client-facing format and an
/// upstream format.
///
/// `request` translates the client body into the upstream format and
/// `response` translates a unary upstream reply back; `stream` builds a
/// fresh state machine that does the same for SSE streams. Request bodies
/// are passed as JSON values so the registry stays object-safe; converters
/// deserialize into their typed shapes internally.
pub struct FormatAdapter {
    pub client: WireFormat,
    pub upstream: WireFormat,
    request: fn(&Value) -> crate::Result<Value>,
    response: fn(&Value) -> crate::Result<Value>,
    stream: fn(&Value) -> Box<dyn stream::StreamAdapter>,
}

impl FormatAdapter {
    /// Translate a client request body into the upstream format.
    pub fn convert_request(&self, body: &Value) -> crate::Result<Value> {
        (self.request)(body)
    }

    /// Translate a unary upstream response back into the client format.
    pub fn convert_response(&self, body: &Value) -> crate::Result<Value> {
        (self.response)(body)
    }

    /// Build a stream converter for one request. The original client
    /// request body is passed so tool definitions can seed the name
    /// inference catalog.
    pub fn stream_adapter(&self, client_request: &Value) -> Box<dyn stream::StreamAdapter> {
        (self.stream)(client_request)
    }
}

/// Look up the built-in adapter for a format pair. Identity pairs return
/// `None`; the dispatcher forwards those untouched.
pub fn adapter_for(client: WireFormat, upstream: WireFormat) -> Option<FormatAdapter> {
    use WireFormat::*;

    let (request, response, stream): (
        fn(&Value) -> crate::Result<Value>,
        fn(&Value) -> crate::Result<Value>,
        fn(&Value) -> Box<dyn stream::StreamAdapter>,
    ) = match (client, upstream) {
        (ChatCompletions, AnthropicMessages) => (
            |body| {
                let request = parse_client::<crate::protocol::chat::ChatCompletionRequest>(body)?;
                to_value(&unary::request_chat_to_anthropic(&request)?)
            },
            |body| {
                let response = parse_upstream::<crate::protocol::anthropic::MessageResponse>(body)?;
                to_value(&unary::response_anthropic_to_chat(&response))
            },
            |request| Box::new(stream::AnthropicToChat::new(chat_catalog(request))),
        ),
        (Responses, AnthropicMessages) => (
            |body| {
                let request = parse_client::<crate::protocol::responses::ResponseRequest>(body)?;
                to_value(&unary::request_responses_to_anthropic(&request))
            },
            |body| {
                let response = parse_upstream::<crate::protocol::anthropic::MessageResponse>(body)?;
                to_value(&unary::response_anthropic_to_responses(&response))
            },
            |_request| Box::new(stream::AnthropicToResponses::new()),
        ),
        (AnthropicMessages, ChatCompletions) => (
            |body| {
                let request = parse_client::<crate::protocol::anthropic::CreateMessageRequest>(body)?;
                to_value(&unary::request_anthropic_to_chat(&request))
            },
            |body| {
                let response = parse_upstream::<crate::protocol::chat::ChatCompletionResponse>(body)?;
                to_value(&unary::response_chat_to_anthropic(&response))
            },
            |request| Box::new(stream::ChatToAnthropic::new(anthropic_catalog(request))),
        ),
        (Responses, ChatCompletions) => (
            |body| {
                let request = parse_client::<crate::protocol::responses::ResponseRequest>(body)?;
                to_value(&unary::request_responses_to_chat(&request))
            },
            |body| {
                let response = parse_upstream::<crate::protocol::chat::ChatCompletionResponse>(body)?;
                to_value(&unary::response_chat_to_responses(&response))
            },
            |_request| Box::new(stream::ChatToResponses::new()),
        ),
        (AnthropicMessages, Responses) => (
            |body| {
                let request = parse_client::<crate::protocol::anthropic::CreateMessageRequest>(body)?;
                to_value(&unary::request_anthropic_to_responses(&request))
            },
            |body| {
                let response = parse_upstream::<crate::protocol::responses::ResponseObject>(body)?;
                to_value(&unary::response_responses_to_anthropic(&response))
            },
            |request| Box::new(stream::ResponsesToAnthropic::new(anthropic_catalog(request))),
        ),
        (ChatCompletions, Responses) => (
            |body| {
                let request = parse_client::<crate::protocol::chat::ChatCompletionRequest>(body)?;
                to_value(&unary::request_chat_to_responses(&request))
            },
            |body| {
                let response = parse_upstream::<crate::protocol::responses::ResponseObject>(body)?;
                to_value(&unary::response_responses_to_chat(&response))
            },
            |request| Box::new(stream::ResponsesToChat::new(chat_catalog(request))),
        ),
        _ => return None,
    };

    Some(FormatAdapter {
        client,
        upstream,
        request,
        response,
        stream,
    })
}

/// Validate a body against its declared wire format without translating
/// it. Used on identity format chains, where the dispatcher still owes the
/// client a 400 for malformed payloads.
pub fn validate_request(format: WireFormat, body: &Value) -> crate::Result<Value> {
    match format {
        WireFormat::AnthropicMessages => {
            parse_client::<crate::protocol::anthropic::CreateMessageRequest>(body)?;
        }
        WireFormat::ChatCompletions => {
            parse_client::<crate::protocol::chat::ChatCompletionRequest>(body)?;
        }
        WireFormat::Responses => {
            parse_client::<crate::protocol::responses::ResponseRequest>(body)?;
        }
    }

    Ok(body.clone())
}

fn parse_client<T: serde::de::DeserializeOwned>(body: &Value) -> crate::Result<T> {
    serde_json::from_value(body.clone()).map_err(|e| crate::LlmError::InvalidRequest(e.to_string()))
}

fn parse_upstream<T: serde::de::DeserializeOwned>(body: &Value) -> crate::Result<T> {
    serde_json::from_value(body.clone()).map_err(|e| {
        log::error!("Failed to parse upstream response: {e}");
        crate::LlmError::Internal(Some(format!("Could not parse upstream response: {e}")))
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> crate::Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        log::error!("Failed to serialize converted payload: {e}");
        crate::LlmError::Internal(None)
    })
}

/// Tool catalog for sinks that emit Chat-style tool calls, seeded from
/// whichever request shape the client sent.
fn chat_catalog(request: &Value) -> tools::ToolCatalog {
    catalog_from_request(request)
}

fn anthropic_catalog(request: &Value) -> tools::ToolCatalog {
    catalog_from_request(request)
}

fn catalog_from_request(request: &Value) -> tools::ToolCatalog {
    let Some(raw_tools) = request.get("tools").filter(|t| t.is_array()) else {
        return tools::ToolCatalog::default();
    };

    if let Ok(chat_tools) = serde_json::from_value::<Vec<crate::protocol::chat::Tool>>(raw_tools.clone()) {
        return tools::ToolCatalog::from_chat(&chat_tools);
    }

    if let Ok(responses_tools) = serde_json::from_value::<Vec<crate::protocol::responses::Tool>>(raw_tools.clone()) {
        return tools::ToolCatalog::from_responses(&responses_tools);
    }

    if let Ok(anthropic_tools) = serde_json::from_value::<Vec<crate::protocol::anthropic::Tool>>(raw_tools.clone()) {
        return tools::ToolCatalog::from_anthropic(&anthropic_tools);
    }

    tools::ToolCatalog::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_six_pairs_have_adapters() {
        use WireFormat::*;

        for client in [AnthropicMessages, ChatCompletions, Responses] {
            for upstream in [AnthropicMessages, ChatCompletions, Responses] {
                let adapter = adapter_for(client, upstream);
                if client == upstream {
                    assert!(adapter.is_none());
                } else {
                    assert!(adapter.is_some(), "missing adapter {client} -> {upstream}");
                }
            }
        }
    }

    #[test]
    fn invalid_client_body_maps_to_invalid_request() {
        let adapter = adapter_for(WireFormat::ChatCompletions, WireFormat::AnthropicMessages).unwrap();
        let err = adapter
            .convert_request(&serde_json::json!({"model": 42}))
            .unwrap_err();

        assert!(matches!(err, crate::LlmError::InvalidRequest(_)));
    }
}
