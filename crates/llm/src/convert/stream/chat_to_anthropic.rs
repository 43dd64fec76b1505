//! Chat Completions chunk stream → Anthropic event stream.

use std::collections::HashMap;

use serde_json::Value;

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::{
        thinking::{ScanItem, ThinkingScanner},
        tools::ToolCatalog,
        unary,
        usage,
    },
    protocol::{anthropic, chat},
};

/// State machine converting Chat chunks into Anthropic stream events.
///
/// Chat deltas are flat; Anthropic events are block-structured, so the
/// converter opens and closes content blocks as the delta kind changes.
/// Inline `<thinking>` runs in the assistant text are lifted back into
/// dedicated thinking blocks, signature included.
pub struct ChatToAnthropic {
    started: bool,
    message_id: String,
    model: String,
    scanner: ThinkingScanner,
    catalog: ToolCatalog,
    block_index: u32,
    open_block: OpenBlock,
    tools: HashMap<u32, ToolBlock>,
    usage: Option<chat::CompletionUsage>,
    finish_reason: Option<chat::FinishReason>,
    finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    None,
    Text(u32),
    Tool(u32),
}

#[derive(Debug)]
struct ToolBlock {
    block_index: u32,
    arguments: String,
    name: String,
    started: bool,
}

impl ChatToAnthropic {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            started: false,
            message_id: String::new(),
            model: String::new(),
            scanner: ThinkingScanner::new(),
            catalog,
            block_index: 0,
            open_block: OpenBlock::None,
            tools: HashMap::new(),
            usage: None,
            finish_reason: None,
            finished: false,
        }
    }

    fn emit(&self, event: anthropic::StreamEvent) -> Option<OutFrame> {
        let name = event.event_name();
        to_frame(name, &event)
    }

    fn ensure_started(&mut self, frames: &mut Vec<OutFrame>) {
        if self.started {
            return;
        }
        self.started = true;

        frames.extend(self.emit(anthropic::StreamEvent::MessageStart {
            message: anthropic::MessageStart {
                id: self.message_id.clone(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                content: Vec::new(),
                usage: anthropic::Usage::default(),
                stop_reason: None,
                stop_sequence: None,
            },
        }));
    }

    fn close_open_block(&mut self, frames: &mut Vec<OutFrame>) {
        match self.open_block {
            OpenBlock::None => {}
            OpenBlock::Text(index) | OpenBlock::Tool(index) => {
                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStop { index }));
            }
        }
        self.open_block = OpenBlock::None;
    }

    fn text_delta(&mut self, text: String, frames: &mut Vec<OutFrame>) {
        if text.is_empty() {
            return;
        }

        let index = match self.open_block {
            OpenBlock::Text(index) => index,
            _ => {
                self.close_open_block(frames);
                let index = self.block_index;
                self.block_index += 1;
                self.open_block = OpenBlock::Text(index);
                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::Text { text: String::new() },
                }));
                index
            }
        };

        frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
            index,
            delta: anthropic::BlockDelta::TextDelta { text },
        }));
    }

    /// A complete thinking segment becomes a self-contained block:
    /// start, thinking delta, optional signature delta, stop.
    fn thinking_block(&mut self, text: String, signature: Option<String>, frames: &mut Vec<OutFrame>) {
        self.close_open_block(frames);

        let index = self.block_index;
        self.block_index += 1;

        frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStart {
            index,
            content_block: anthropic::ContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
        }));
        frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
            index,
            delta: anthropic::BlockDelta::ThinkingDelta { thinking: text },
        }));
        if let Some(signature) = signature {
            frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
                index,
                delta: anthropic::BlockDelta::SignatureDelta { signature },
            }));
        }
        frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStop { index }));
    }

    fn process_chunk(&mut self, chunk: chat::ChatCompletionChunk) -> Vec<OutFrame> {
        let mut frames = Vec::new();

        if self.message_id.is_empty() && !chunk.id.is_empty() {
            self.message_id = chunk.id.clone();
        }
        if !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }

        self.ensure_started(&mut frames);

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return frames;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            for item in self.scanner.feed(&text) {
                match item {
                    ScanItem::Text(text) => self.text_delta(text, &mut frames),
                    ScanItem::Reasoning(segment) => {
                        self.thinking_block(segment.text, segment.signature, &mut frames)
                    }
                }
            }
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let exists = self.tools.contains_key(&delta.index);

            if !exists {
                self.close_open_block(&mut frames);

                let block_index = self.block_index;
                self.block_index += 1;

                let id = delta
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));

                let name = delta
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .filter(|n| !n.is_empty())
                    .or_else(|| self.catalog.name_at(delta.index as usize).map(str::to_string))
                    .unwrap_or_default();

                self.tools.insert(
                    delta.index,
                    ToolBlock {
                        block_index,
                        arguments: String::new(),
                        name: name.clone(),
                        started: true,
                    },
                );
                self.open_block = OpenBlock::Tool(block_index);

                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStart {
                    index: block_index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id,
                        name,
                        input: Value::Object(Default::default()),
                    },
                }));
            }

            if let Some(arguments) = delta.function.as_ref().and_then(|f| f.arguments.clone()).filter(|a| !a.is_empty()) {
                let block_index = {
                    let tool = self.tools.get_mut(&delta.index).expect("tool block just ensured");
                    tool.arguments.push_str(&arguments);
                    tool.block_index
                };

                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: anthropic::BlockDelta::InputJsonDelta { partial_json: arguments },
                }));
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        frames
    }
}

impl StreamAdapter for ChatToAnthropic {
    fn process(&mut self, event: Value) -> Vec<OutFrame> {
        match decode_event::<chat::ChatCompletionChunk>(event) {
            Ok(chunk) => self.process_chunk(chunk),
            Err(Some(error_frame)) => vec![error_frame],
            Err(None) => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();
        self.ensure_started(&mut frames);

        for item in self.scanner.finish() {
            match item {
                ScanItem::Text(text) => self.text_delta(text, &mut frames),
                ScanItem::Reasoning(segment) => self.thinking_block(segment.text, segment.signature, &mut frames),
            }
        }

        self.close_open_block(&mut frames);

        let stop_reason = match &self.finish_reason {
            Some(reason) => unary::finish_to_stop_reason(reason),
            None if !self.tools.is_empty() => anthropic::StopReason::ToolUse,
            None => anthropic::StopReason::EndTurn,
        };

        frames.extend(self.emit(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaPayload {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: self.usage.as_ref().map(usage::chat_to_anthropic),
        }));
        frames.extend(self.emit(anthropic::StreamEvent::MessageStop));

        frames
    }

    fn emits_done_marker(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(chunks: Vec<Value>) -> Vec<OutFrame> {
        let mut converter = ChatToAnthropic::new(ToolCatalog::default());
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(converter.process(chunk));
        }
        frames.extend(converter.finish());
        frames
    }

    fn text_chunk(text: &str) -> Value {
        json!({
            "id": "chatcmpl-1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        })
    }

    #[test]
    fn event_names_follow_the_anthropic_lifecycle() {
        let frames = run(vec![
            text_chunk("he"),
            text_chunk("llo"),
            json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            }),
        ]);

        let names: Vec<_> = frames.iter().filter_map(|f| f.event).collect();
        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let message_delta = frames.iter().find(|f| f.event == Some("message_delta")).unwrap();
        assert_eq!(message_delta.data["usage"]["input_tokens"], 3);
        assert_eq!(message_delta.data["usage"]["output_tokens"], 2);
        assert_eq!(message_delta.data["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn inline_thinking_becomes_a_thinking_block() {
        let frames = run(vec![text_chunk(
            r#"lead<thinking signature="S">pondering</thinking>tail"#,
        )]);

        let thinking_delta = frames
            .iter()
            .find(|f| f.data.pointer("/delta/thinking").is_some())
            .unwrap();
        assert_eq!(thinking_delta.data["delta"]["thinking"], "pondering");

        let signature_delta = frames
            .iter()
            .find(|f| f.data.pointer("/delta/signature").is_some())
            .unwrap();
        assert_eq!(signature_delta.data["delta"]["signature"], "S");

        let texts: Vec<_> = frames
            .iter()
            .filter_map(|f| f.data.pointer("/delta/text").and_then(Value::as_str))
            .collect();
        assert_eq!(texts, ["lead", "tail"]);
    }

    #[test]
    fn tool_call_deltas_open_a_tool_use_block() {
        let frames = run(vec![
            json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"location\":\"SF\"}"}}
                ]}, "finish_reason": null}]
            }),
            json!({
                "id": "chatcmpl-1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
            }),
        ]);

        let start = frames.iter().find(|f| f.event == Some("content_block_start")).unwrap();
        assert_eq!(start.data["content_block"]["type"], "tool_use");
        assert_eq!(start.data["content_block"]["name"], "get_weather");

        let delta = frames
            .iter()
            .find(|f| f.data.pointer("/delta/partial_json").is_some())
            .unwrap();
        assert_eq!(delta.data["delta"]["partial_json"], "{\"location\":\"SF\"}");

        let message_delta = frames.iter().find(|f| f.event == Some("message_delta")).unwrap();
        assert_eq!(message_delta.data["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn no_done_marker_for_anthropic_sink() {
        let converter = ChatToAnthropic::new(ToolCatalog::default());
        assert!(!converter.emits_done_marker());
    }
}
