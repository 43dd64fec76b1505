//! Chat Completions chunk stream → Responses event stream.

use std::collections::HashMap;

use serde_json::Value;

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::usage,
    protocol::{chat, responses},
};

const RESPONSE_ID: &str = "chat-to-resp";
const MESSAGE_ITEM_ID: &str = "msg_stream";

/// State machine converting Chat chunks into `response.*` events.
///
/// Emits `response.created` on the first chunk, text deltas as
/// `response.output_text.delta`, tool-call deltas as function-call item
/// events, and a terminal `response.completed` (or `response.incomplete`
/// when the upstream hit its length limit) carrying the single usage
/// record. Every event gets a strictly increasing `sequence_number`.
pub struct ChatToResponses {
    created_sent: bool,
    model: String,
    sequence: u64,
    content_index: u32,
    text: String,
    usage: Option<chat::CompletionUsage>,
    finish_reason: Option<chat::FinishReason>,
    tool_items: HashMap<u32, ToolItem>,
    finished: bool,
}

#[derive(Debug, Default)]
struct ToolItem {
    id: String,
    name: String,
    arguments: String,
}

impl ChatToResponses {
    pub fn new() -> Self {
        Self {
            created_sent: false,
            model: String::new(),
            sequence: 0,
            content_index: 0,
            text: String::new(),
            usage: None,
            finish_reason: None,
            tool_items: HashMap::new(),
            finished: false,
        }
    }

    fn emit(&mut self, event: responses::StreamEvent) -> Option<OutFrame> {
        self.sequence += 1;
        let event = event.with_sequence_number(self.sequence);
        let name = event.event_name();
        to_frame(name, &event)
    }

    fn stub(&self, status: responses::ResponseStatus) -> responses::ResponseObject {
        responses::ResponseObject::stub(RESPONSE_ID, self.model.clone(), status)
    }

    fn process_chunk(&mut self, chunk: chat::ChatCompletionChunk) -> Vec<OutFrame> {
        let mut frames = Vec::new();

        if !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }

        if !self.created_sent {
            self.created_sent = true;
            let stub = self.stub(responses::ResponseStatus::InProgress);
            frames.extend(self.emit(responses::StreamEvent::Created {
                sequence_number: None,
                response: stub,
            }));
        }

        if let Some(usage) = &chunk.usage {
            // Usage surfaces once, on the terminal event.
            self.usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return frames;
        };

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            self.text.push_str(&text);
            let content_index = self.content_index;
            frames.extend(self.emit(responses::StreamEvent::OutputTextDelta {
                sequence_number: None,
                item_id: Some(MESSAGE_ITEM_ID.to_string()),
                output_index: 0,
                content_index,
                delta: text,
            }));
            self.content_index += 1;
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let is_new = !self.tool_items.contains_key(&delta.index);
            let item = self.tool_items.entry(delta.index).or_default();

            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                item.id = id;
            }
            if item.id.is_empty() {
                item.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }

            if let Some(function) = delta.function {
                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    item.name = name;
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    item.arguments.push_str(&arguments);

                    let (id, fragment) = (item.id.clone(), arguments);
                    if is_new {
                        let (name, item_id) = {
                            let item = &self.tool_items[&delta.index];
                            (item.name.clone(), item.id.clone())
                        };
                        frames.extend(self.emit(responses::StreamEvent::OutputItemAdded {
                            sequence_number: None,
                            output_index: delta.index + 1,
                            item: responses::OutputItem::FunctionCall {
                                id: Some(item_id.clone()),
                                call_id: Some(item_id),
                                status: Some("in_progress".to_string()),
                                name: (!name.is_empty()).then_some(name),
                                arguments: None,
                            },
                        }));
                    }
                    frames.extend(self.emit(responses::StreamEvent::FunctionCallArgumentsDelta {
                        sequence_number: None,
                        item_id: Some(id),
                        output_index: delta.index + 1,
                        delta: fragment,
                    }));
                    continue;
                }
            }

            if is_new {
                let (name, item_id) = {
                    let item = &self.tool_items[&delta.index];
                    (item.name.clone(), item.id.clone())
                };
                frames.extend(self.emit(responses::StreamEvent::OutputItemAdded {
                    sequence_number: None,
                    output_index: delta.index + 1,
                    item: responses::OutputItem::FunctionCall {
                        id: Some(item_id.clone()),
                        call_id: Some(item_id),
                        status: Some("in_progress".to_string()),
                        name: (!name.is_empty()).then_some(name),
                        arguments: None,
                    },
                }));
            }
        }

        frames
    }
}

impl Default for ChatToResponses {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for ChatToResponses {
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

        // Close out any tool-call items.
        let mut indices: Vec<u32> = self.tool_items.keys().copied().collect();
        indices.sort_unstable();

        for index in indices {
            let (id, name, arguments) = {
                let item = &self.tool_items[&index];
                (item.id.clone(), item.name.clone(), item.arguments.clone())
            };

            frames.extend(self.emit(responses::StreamEvent::FunctionCallArgumentsDone {
                sequence_number: None,
                item_id: Some(id.clone()),
                arguments: Some(arguments.clone()),
            }));
            frames.extend(self.emit(responses::StreamEvent::OutputItemDone {
                sequence_number: None,
                output_index: index + 1,
                item: responses::OutputItem::FunctionCall {
                    id: Some(id.clone()),
                    call_id: Some(id),
                    status: Some("completed".to_string()),
                    name: (!name.is_empty()).then_some(name),
                    arguments: Some(Value::String(arguments)),
                },
            }));
        }

        if !self.text.is_empty() {
            let text = self.text.clone();
            frames.extend(self.emit(responses::StreamEvent::OutputTextDone {
                sequence_number: None,
                item_id: Some(MESSAGE_ITEM_ID.to_string()),
                output_index: 0,
                content_index: self.content_index,
                text,
            }));
        }

        let status = match self.finish_reason {
            Some(chat::FinishReason::Length) => responses::ResponseStatus::Incomplete,
            _ => responses::ResponseStatus::Completed,
        };

        let mut response = self.stub(status);
        response.usage = self.usage.as_ref().map(usage::chat_to_responses);

        let terminal = match status {
            responses::ResponseStatus::Incomplete => responses::StreamEvent::Incomplete {
                sequence_number: None,
                response,
            },
            _ => responses::StreamEvent::Completed {
                sequence_number: None,
                response,
            },
        };
        frames.extend(self.emit(terminal));

        frames
    }

    fn emits_done_marker(&self) -> bool {
        true
    }
}
