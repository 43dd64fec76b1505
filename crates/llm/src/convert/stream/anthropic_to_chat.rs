//! Anthropic event stream → Chat Completions chunk stream.

use std::collections::HashMap;

use serde_json::Value;

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::{
        thinking::{ThinkingSegment, thinking_xml_enabled},
        tools::ToolCatalog,
        unary,
        usage,
    },
    protocol::{anthropic, chat},
};

/// State machine converting Anthropic stream events into Chat chunks.
///
/// Anthropic streams are block-structured; Chat streams are flat deltas.
/// Text deltas forward immediately, tool blocks map to indexed tool-call
/// deltas, and thinking blocks buffer until `content_block_stop` because
/// the signature (which belongs in the opening XML tag) only arrives in a
/// trailing `signature_delta`.
pub struct AnthropicToChat {
    message_id: String,
    model: String,
    role_sent: bool,
    catalog: ToolCatalog,
    start_usage: Option<anthropic::Usage>,
    tools: HashMap<u32, ToolBlock>,
    thinking: HashMap<u32, ThinkingBlock>,
    tool_count: u32,
    finished: bool,
}

#[derive(Debug)]
struct ToolBlock {
    chat_index: u32,
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct ThinkingBlock {
    text: String,
    signature: Option<String>,
}

impl AnthropicToChat {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            role_sent: false,
            catalog,
            start_usage: None,
            tools: HashMap::new(),
            thinking: HashMap::new(),
            tool_count: 0,
            finished: false,
        }
    }

    fn chunk(&self, delta: chat::DeltaMessage, finish_reason: Option<chat::FinishReason>) -> chat::ChatCompletionChunk {
        let mut chunk = chat::ChatCompletionChunk::new(self.message_id.clone(), self.model.clone());
        chunk.choices.push(chat::StreamingChoice {
            index: 0,
            delta,
            finish_reason,
        });
        chunk
    }

    fn text_frame(&mut self, text: String) -> Option<OutFrame> {
        if text.is_empty() {
            return None;
        }

        let delta = chat::DeltaMessage {
            role: (!self.role_sent).then_some(chat::ChatRole::Assistant),
            content: Some(text),
            tool_calls: None,
        };
        self.role_sent = true;
        to_frame(None, &self.chunk(delta, None))
    }

    fn tool_frame(&mut self, chat_index: u32, id: Option<String>, name: Option<String>, arguments: Option<String>) -> Option<OutFrame> {
        let delta = chat::DeltaMessage {
            role: (!self.role_sent).then_some(chat::ChatRole::Assistant),
            content: None,
            tool_calls: Some(vec![chat::ToolCallDelta {
                index: chat_index,
                id,
                r#type: Some(chat::ToolType::Function),
                function: Some(chat::FunctionCallDelta { name, arguments }),
            }]),
        };
        self.role_sent = true;
        to_frame(None, &self.chunk(delta, None))
    }

    fn process_event(&mut self, event: anthropic::StreamEvent) -> Vec<OutFrame> {
        use anthropic::StreamEvent::*;

        match event {
            MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;
                self.start_usage = Some(message.usage);

                let delta = chat::DeltaMessage {
                    role: Some(chat::ChatRole::Assistant),
                    content: None,
                    tool_calls: None,
                };
                self.role_sent = true;
                to_frame(None, &self.chunk(delta, None)).into_iter().collect()
            }

            ContentBlockStart { index, content_block } => match content_block {
                anthropic::ContentBlock::ToolUse { id, name, .. } => {
                    let chat_index = self.tool_count;
                    self.tool_count += 1;

                    let name = if name.is_empty() {
                        self.catalog.name_at(chat_index as usize).unwrap_or_default().to_string()
                    } else {
                        name
                    };

                    self.tools.insert(
                        index,
                        ToolBlock {
                            chat_index,
                            id: id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                        },
                    );

                    self.tool_frame(chat_index, Some(id), Some(name), Some(String::new()))
                        .into_iter()
                        .collect()
                }
                anthropic::ContentBlock::Thinking { thinking, signature } => {
                    self.thinking.insert(
                        index,
                        ThinkingBlock {
                            text: thinking,
                            signature: (!signature.is_empty()).then_some(signature),
                        },
                    );
                    Vec::new()
                }
                _ => Vec::new(),
            },

            ContentBlockDelta { index, delta } => match delta {
                anthropic::BlockDelta::TextDelta { text } => self.text_frame(text).into_iter().collect(),
                anthropic::BlockDelta::InputJsonDelta { partial_json } => {
                    let Some(block) = self.tools.get_mut(&index) else {
                        return Vec::new();
                    };
                    block.arguments.push_str(&partial_json);

                    if block.name.is_empty()
                        && let Some(guessed) = self.catalog.guess(&block.arguments.clone()).map(str::to_string)
                    {
                        block.name = guessed;
                    }

                    let chat_index = block.chat_index;
                    self.tool_frame(chat_index, None, None, Some(partial_json))
                        .into_iter()
                        .collect()
                }
                anthropic::BlockDelta::ThinkingDelta { thinking } => {
                    self.thinking.entry(index).or_default().text.push_str(&thinking);
                    Vec::new()
                }
                anthropic::BlockDelta::SignatureDelta { signature } => {
                    if !signature.is_empty() {
                        self.thinking.entry(index).or_default().signature = Some(signature);
                    }
                    Vec::new()
                }
            },

            ContentBlockStop { index } => {
                let mut frames = Vec::new();

                if let Some(block) = self.thinking.remove(&index) {
                    if thinking_xml_enabled() && !block.text.is_empty() {
                        let xml = ThinkingSegment::new(block.text, block.signature).to_xml();
                        frames.extend(self.text_frame(xml));
                    }
                } else if let Some(block) = self.tools.get(&index)
                    && block.name.is_empty()
                {
                    // Name never surfaced: emit a trailing patch chunk if
                    // the key-set heuristic resolves it now.
                    if let Some(guessed) = self.catalog.guess(&block.arguments.clone()).map(str::to_string) {
                        let chat_index = block.chat_index;
                        if let Some(block) = self.tools.get_mut(&index) {
                            block.name = guessed.clone();
                        }
                        frames.extend(self.tool_frame(chat_index, None, Some(guessed), None));
                    }
                }

                frames
            }

            MessageDelta { delta, usage } => {
                let finish_reason = match delta.stop_reason.as_ref() {
                    Some(reason) => unary::stop_reason_to_finish(Some(reason)),
                    None if !self.tools.is_empty() => chat::FinishReason::ToolCalls,
                    None => chat::FinishReason::Stop,
                };

                // message_delta usage omits input tokens; merge from
                // message_start.
                let mut final_usage = usage.unwrap_or_default();
                if final_usage.input_tokens == 0
                    && let Some(start) = &self.start_usage
                {
                    final_usage.input_tokens = start.input_tokens;
                    final_usage.cache_read_input_tokens = start.cache_read_input_tokens;
                    final_usage.cache_creation_input_tokens = start.cache_creation_input_tokens;
                }

                let mut chunk = self.chunk(chat::DeltaMessage::default(), Some(finish_reason));
                chunk.usage = Some(usage::anthropic_to_chat(&final_usage));
                self.finished = true;

                to_frame(None, &chunk).into_iter().collect()
            }

            Error { error } => {
                log::error!("Upstream stream error: {} - {}", error.r#type, error.message);
                vec![OutFrame::error(serde_json::json!({"error": {
                    "type": error.r#type,
                    "message": error.message,
                }}))]
            }

            MessageStop | Ping | Unknown(_) => Vec::new(),
        }
    }
}

impl StreamAdapter for AnthropicToChat {
    fn process(&mut self, event: Value) -> Vec<OutFrame> {
        match decode_event::<anthropic::StreamEvent>(event) {
            Ok(event) => self.process_event(event),
            Err(Some(error_frame)) => vec![error_frame],
            Err(None) => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        // Upstream closed without message_delta; synthesize the terminal
        // chunk so the client still sees a finish reason.
        let finish_reason = if self.tools.is_empty() {
            chat::FinishReason::Stop
        } else {
            chat::FinishReason::ToolCalls
        };

        let mut chunk = self.chunk(chat::DeltaMessage::default(), Some(finish_reason));
        chunk.usage = self.start_usage.as_ref().map(usage::anthropic_to_chat);

        to_frame(None, &chunk).into_iter().collect()
    }

    fn emits_done_marker(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunks(frames: &[OutFrame]) -> Vec<chat::ChatCompletionChunk> {
        frames
            .iter()
            .map(|f| serde_json::from_value(f.data.clone()).unwrap())
            .collect()
    }

    fn run(events: Vec<Value>) -> Vec<OutFrame> {
        let mut converter = AnthropicToChat::new(ToolCatalog::default());
        let mut frames = Vec::new();
        for event in events {
            frames.extend(converter.process(event));
        }
        frames.extend(converter.finish());
        frames
    }

    fn message_start() -> Value {
        json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "role": "assistant", "model": "claude-sonnet-4", "content": [],
                "usage": {"input_tokens": 5, "output_tokens": 0}
            }
        })
    }

    #[test]
    fn text_stream_maps_to_chat_chunks() {
        let frames = run(vec![
            message_start(),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "!"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
            json!({"type": "message_stop"}),
        ]);

        let chunks = chunks(&frames);

        // Role chunk, two text chunks, terminal chunk.
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].choices[0].delta.role, Some(chat::ChatRole::Assistant));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("Hi"));
        assert_eq!(chunks[2].choices[0].delta.content.as_deref(), Some("!"));

        let last = &chunks[3];
        assert_eq!(last.choices[0].finish_reason, Some(chat::FinishReason::Stop));
        let usage = last.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(last.id, "msg_1");
        assert_eq!(last.model, "claude-sonnet-4");
    }

    #[test]
    fn thinking_block_buffers_until_stop_for_the_signature() {
        let frames = run(vec![
            message_start(),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": "", "signature": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "mulling"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "sig-1"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 1}}),
        ]);

        let content: String = chunks(&frames)
            .iter()
            .filter_map(|c| c.choices[0].delta.content.clone())
            .collect();

        assert_eq!(content, r#"<thinking signature="sig-1">mulling</thinking>"#);
    }

    #[test]
    fn tool_use_maps_to_tool_call_deltas() {
        let frames = run(vec![
            message_start(),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"location\":"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "\"SF\"}"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 7}}),
        ]);

        let chunks = chunks(&frames);

        let start = chunks[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(start[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(start[0].function.as_ref().unwrap().name.as_deref(), Some("get_weather"));

        let arguments: String = chunks
            .iter()
            .flat_map(|c| c.choices[0].delta.tool_calls.iter().flatten())
            .filter_map(|tc| tc.function.as_ref().and_then(|f| f.arguments.clone()))
            .collect();
        assert_eq!(arguments, "{\"location\":\"SF\"}");

        assert_eq!(
            chunks.last().unwrap().choices[0].finish_reason,
            Some(chat::FinishReason::ToolCalls)
        );
    }

    #[test]
    fn stream_error_becomes_bare_error_frame() {
        let mut converter = AnthropicToChat::new(ToolCatalog::default());
        let frames = converter.process(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "busy"}
        }));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data["error"]["type"], "overloaded_error");
    }

    #[test]
    fn usage_appears_exactly_once() {
        let frames = run(vec![
            message_start(),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "x"}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 1}}),
            json!({"type": "message_stop"}),
        ]);

        let count = chunks(&frames).iter().filter(|c| c.usage.is_some()).count();
        assert_eq!(count, 1);
    }
}
