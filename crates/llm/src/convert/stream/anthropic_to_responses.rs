//! Anthropic event stream → Responses event stream.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::usage,
    protocol::{anthropic, responses},
};

/// State machine converting Anthropic stream events into `response.*`
/// events with contiguous sequence numbers.
pub struct AnthropicToResponses {
    response_id: String,
    model: String,
    sequence: u64,
    start_usage: Option<anthropic::Usage>,
    final_usage: Option<anthropic::Usage>,
    stop_reason: Option<anthropic::StopReason>,
    blocks: HashMap<u32, Block>,
    output: Vec<responses::OutputItem>,
    finished: bool,
}

#[derive(Debug)]
enum Block {
    Text { item_id: String, text: String },
    Thinking {
        item_id: String,
        text: String,
        signature: Option<String>,
    },
    Tool {
        item_id: String,
        name: String,
        arguments: String,
    },
}

impl AnthropicToResponses {
    pub fn new() -> Self {
        Self {
            response_id: String::new(),
            model: String::new(),
            sequence: 0,
            start_usage: None,
            final_usage: None,
            stop_reason: None,
            blocks: HashMap::new(),
            output: Vec::new(),
            finished: false,
        }
    }

    fn emit(&mut self, event: responses::StreamEvent) -> Option<OutFrame> {
        self.sequence += 1;
        let event = event.with_sequence_number(self.sequence);
        let name = event.event_name();
        to_frame(name, &event)
    }

    fn process_event(&mut self, event: anthropic::StreamEvent) -> Vec<OutFrame> {
        use anthropic::StreamEvent::*;

        let mut frames = Vec::new();

        match event {
            MessageStart { message } => {
                self.response_id = message.id;
                self.model = message.model;
                self.start_usage = Some(message.usage);

                let response = responses::ResponseObject::stub(
                    self.response_id.clone(),
                    self.model.clone(),
                    responses::ResponseStatus::InProgress,
                );
                frames.extend(self.emit(responses::StreamEvent::Created {
                    sequence_number: None,
                    response,
                }));
            }

            ContentBlockStart { index, content_block } => match content_block {
                anthropic::ContentBlock::Text { text } => {
                    let item_id = format!("msg_{}_{index}", self.response_id);
                    self.blocks.insert(
                        index,
                        Block::Text {
                            item_id: item_id.clone(),
                            text,
                        },
                    );

                    frames.extend(self.emit(responses::StreamEvent::OutputItemAdded {
                        sequence_number: None,
                        output_index: index,
                        item: responses::OutputItem::Message {
                            id: Some(item_id),
                            status: Some("in_progress".to_string()),
                            role: "assistant".to_string(),
                            content: Vec::new(),
                        },
                    }));
                }
                anthropic::ContentBlock::Thinking { thinking, signature } => {
                    let item_id = format!("reasoning_{}_{index}", self.response_id);
                    self.blocks.insert(
                        index,
                        Block::Thinking {
                            item_id: item_id.clone(),
                            text: thinking,
                            signature: (!signature.is_empty()).then_some(signature),
                        },
                    );

                    frames.extend(self.emit(responses::StreamEvent::OutputItemAdded {
                        sequence_number: None,
                        output_index: index,
                        item: responses::OutputItem::Reasoning {
                            id: Some(item_id.clone()),
                            status: Some("in_progress".to_string()),
                            summary: Vec::new(),
                        },
                    }));
                    frames.extend(self.emit(responses::StreamEvent::ReasoningSummaryPartAdded {
                        sequence_number: None,
                        item_id: Some(item_id),
                        summary_index: Some(0),
                        part: Some(json!({"type": "summary_text", "text": ""})),
                    }));
                }
                anthropic::ContentBlock::ToolUse { id, name, .. } => {
                    self.blocks.insert(
                        index,
                        Block::Tool {
                            item_id: id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                        },
                    );

                    frames.extend(self.emit(responses::StreamEvent::OutputItemAdded {
                        sequence_number: None,
                        output_index: index,
                        item: responses::OutputItem::FunctionCall {
                            id: Some(id.clone()),
                            call_id: Some(id),
                            status: Some("in_progress".to_string()),
                            name: Some(name),
                            arguments: None,
                        },
                    }));
                }
                _ => {}
            },

            ContentBlockDelta { index, delta } => match delta {
                anthropic::BlockDelta::TextDelta { text } => {
                    let item_id = match self.blocks.get_mut(&index) {
                        Some(Block::Text { item_id, text: buffer }) => {
                            buffer.push_str(&text);
                            item_id.clone()
                        }
                        _ => format!("msg_{}_{index}", self.response_id),
                    };

                    frames.extend(self.emit(responses::StreamEvent::OutputTextDelta {
                        sequence_number: None,
                        item_id: Some(item_id),
                        output_index: index,
                        content_index: 0,
                        delta: text,
                    }));
                }
                anthropic::BlockDelta::ThinkingDelta { thinking } => {
                    if let Some(Block::Thinking { item_id, text, .. }) = self.blocks.get_mut(&index) {
                        text.push_str(&thinking);
                        let item_id = item_id.clone();
                        frames.extend(self.emit(responses::StreamEvent::ReasoningSummaryTextDelta {
                            sequence_number: None,
                            item_id: Some(item_id),
                            summary_index: Some(0),
                            delta: thinking,
                        }));
                    }
                }
                anthropic::BlockDelta::SignatureDelta { signature } => {
                    if let Some(Block::Thinking { signature: slot, .. }) = self.blocks.get_mut(&index)
                        && !signature.is_empty()
                    {
                        *slot = Some(signature);
                    }
                }
                anthropic::BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(Block::Tool { item_id, arguments, .. }) = self.blocks.get_mut(&index) {
                        arguments.push_str(&partial_json);
                        let item_id = item_id.clone();
                        frames.extend(self.emit(responses::StreamEvent::FunctionCallArgumentsDelta {
                            sequence_number: None,
                            item_id: Some(item_id),
                            output_index: index,
                            delta: partial_json,
                        }));
                    }
                }
            },

            ContentBlockStop { index } => {
                let Some(block) = self.blocks.remove(&index) else {
                    return frames;
                };

                match block {
                    Block::Text { item_id, text } => {
                        frames.extend(self.emit(responses::StreamEvent::OutputTextDone {
                            sequence_number: None,
                            item_id: Some(item_id.clone()),
                            output_index: index,
                            content_index: 0,
                            text: text.clone(),
                        }));

                        let item = responses::OutputItem::Message {
                            id: Some(item_id),
                            status: Some("completed".to_string()),
                            role: "assistant".to_string(),
                            content: vec![responses::OutputContent::OutputText { text }],
                        };
                        self.output.push(item.clone());
                        frames.extend(self.emit(responses::StreamEvent::OutputItemDone {
                            sequence_number: None,
                            output_index: index,
                            item,
                        }));
                    }
                    Block::Thinking {
                        item_id,
                        text,
                        signature,
                    } => {
                        frames.extend(self.emit(responses::StreamEvent::ReasoningSummaryTextDone {
                            sequence_number: None,
                            item_id: Some(item_id.clone()),
                            summary_index: Some(0),
                            text: Some(text.clone()),
                        }));

                        let mut part = json!({"type": "summary_text", "text": text});
                        if let Some(signature) = signature {
                            part["signature"] = Value::String(signature);
                        }

                        let item = responses::OutputItem::Reasoning {
                            id: Some(item_id),
                            status: Some("completed".to_string()),
                            summary: vec![part],
                        };
                        self.output.push(item.clone());
                        frames.extend(self.emit(responses::StreamEvent::OutputItemDone {
                            sequence_number: None,
                            output_index: index,
                            item,
                        }));
                    }
                    Block::Tool {
                        item_id,
                        name,
                        arguments,
                    } => {
                        frames.extend(self.emit(responses::StreamEvent::FunctionCallArgumentsDone {
                            sequence_number: None,
                            item_id: Some(item_id.clone()),
                            arguments: Some(arguments.clone()),
                        }));

                        let item = responses::OutputItem::FunctionCall {
                            id: Some(item_id.clone()),
                            call_id: Some(item_id),
                            status: Some("completed".to_string()),
                            name: Some(name),
                            arguments: Some(Value::String(arguments)),
                        };
                        self.output.push(item.clone());
                        frames.extend(self.emit(responses::StreamEvent::OutputItemDone {
                            sequence_number: None,
                            output_index: index,
                            item,
                        }));
                    }
                }
            }

            MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = Some(reason);
                }
                if let Some(mut usage) = usage {
                    if usage.input_tokens == 0
                        && let Some(start) = &self.start_usage
                    {
                        usage.input_tokens = start.input_tokens;
                        usage.cache_read_input_tokens = start.cache_read_input_tokens;
                    }
                    self.final_usage = Some(usage);
                }
            }

            MessageStop => {
                frames.extend(self.terminal_frames());
            }

            Error { error } => {
                frames.push(OutFrame::error(json!({"error": {
                    "type": error.r#type,
                    "message": error.message,
                }})));
            }

            Ping | Unknown(_) => {}
        }

        frames
    }

    fn terminal_frames(&mut self) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let status = match self.stop_reason {
            Some(anthropic::StopReason::MaxTokens) => responses::ResponseStatus::Incomplete,
            _ => responses::ResponseStatus::Completed,
        };

        let mut response = responses::ResponseObject::stub(self.response_id.clone(), self.model.clone(), status);
        response.output = std::mem::take(&mut self.output);
        response.usage = self
            .final_usage
            .as_ref()
            .or(self.start_usage.as_ref())
            .map(usage::anthropic_to_responses);

        let event = match status {
            responses::ResponseStatus::Incomplete => responses::StreamEvent::Incomplete {
                sequence_number: None,
                response,
            },
            _ => responses::StreamEvent::Completed {
                sequence_number: None,
                response,
            },
        };

        self.emit(event).into_iter().collect()
    }
}

impl Default for AnthropicToResponses {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for AnthropicToResponses {
    fn process(&mut self, event: Value) -> Vec<OutFrame> {
        match decode_event::<anthropic::StreamEvent>(event) {
            Ok(event) => self.process_event(event),
            Err(Some(error_frame)) => vec![error_frame],
            Err(None) => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<OutFrame> {
        self.terminal_frames()
    }

    fn emits_done_marker(&self) -> bool {
        true
    }
}
