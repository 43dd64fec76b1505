//! Responses event stream → Anthropic event stream.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::{
        thinking::{ScanItem, ThinkingScanner},
        tools::ToolCatalog,
        usage,
    },
    protocol::{anthropic, responses},
};

/// State machine converting `response.*` events into Anthropic events.
///
/// Output text deltas are scanned for inline `<thinking>` runs, which are
/// lifted back into dedicated thinking blocks. Reasoning summary events
/// map to thinking blocks directly; function-call items map to `tool_use`
/// blocks with streamed `input_json_delta` fragments.
pub struct ResponsesToAnthropic {
    started: bool,
    message_id: String,
    model: String,
    catalog: ToolCatalog,
    scanner: ThinkingScanner,
    block_index: u32,
    open_text_block: Option<u32>,
    reasoning_blocks: HashMap<String, ReasoningBlock>,
    tool_blocks: HashMap<String, ToolBlock>,
    usage: Option<responses::ResponseUsage>,
    saw_tool: bool,
    status: responses::ResponseStatus,
    finished: bool,
}

#[derive(Debug)]
struct ReasoningBlock {
    block_index: u32,
    signature: Option<String>,
}

#[derive(Debug)]
struct ToolBlock {
    block_index: u32,
}

impl ResponsesToAnthropic {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            started: false,
            message_id: String::new(),
            model: String::new(),
            catalog,
            scanner: ThinkingScanner::new(),
            block_index: 0,
            open_text_block: None,
            reasoning_blocks: HashMap::new(),
            tool_blocks: HashMap::new(),
            usage: None,
            saw_tool: false,
            status: responses::ResponseStatus::Completed,
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

        if self.message_id.is_empty() {
            self.message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        }

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

    fn close_text_block(&mut self, frames: &mut Vec<OutFrame>) {
        if let Some(index) = self.open_text_block.take() {
            frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStop { index }));
        }
    }

    fn text_delta(&mut self, text: String, frames: &mut Vec<OutFrame>) {
        if text.is_empty() {
            return;
        }

        let index = match self.open_text_block {
            Some(index) => index,
            None => {
                let index = self.block_index;
                self.block_index += 1;
                self.open_text_block = Some(index);
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

    fn thinking_block(&mut self, text: String, signature: Option<String>, frames: &mut Vec<OutFrame>) {
        self.close_text_block(frames);

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

    fn scan_and_emit(&mut self, text: &str, frames: &mut Vec<OutFrame>) {
        for item in self.scanner.feed(text) {
            match item {
                ScanItem::Text(text) => self.text_delta(text, frames),
                ScanItem::Reasoning(segment) => self.thinking_block(segment.text, segment.signature, frames),
            }
        }
    }

    fn process_event(&mut self, event: responses::StreamEvent) -> Vec<OutFrame> {
        use responses::StreamEvent::*;

        let mut frames = Vec::new();

        match event {
            Created { response, .. } => {
                self.message_id = response.id.clone();
                self.model = response.model.clone();
                if let Some(tools) = &response.tools
                    && !tools.is_empty()
                {
                    self.catalog = ToolCatalog::from_responses(tools);
                }
                self.ensure_started(&mut frames);
            }

            OutputTextDelta { delta, .. } => {
                self.ensure_started(&mut frames);
                self.scan_and_emit(&delta, &mut frames);
            }

            ReasoningSummaryPartAdded { item_id, part, .. } => {
                self.ensure_started(&mut frames);
                let Some(item_id) = item_id else { return frames };

                self.close_text_block(&mut frames);

                let index = self.block_index;
                self.block_index += 1;

                let signature = part.as_ref().and_then(|p| {
                    p.get("signature")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                });

                self.reasoning_blocks.insert(
                    item_id,
                    ReasoningBlock {
                        block_index: index,
                        signature,
                    },
                );

                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: String::new(),
                    },
                }));
            }

            ReasoningSummaryTextDelta { item_id, delta, .. } | ReasoningTextDelta { item_id, delta, .. } => {
                self.ensure_started(&mut frames);
                let Some(block) = item_id.as_ref().and_then(|id| self.reasoning_blocks.get(id)) else {
                    return frames;
                };

                let index = block.block_index;
                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::BlockDelta::ThinkingDelta { thinking: delta },
                }));
            }

            ReasoningSummaryTextDone { item_id, .. } | ReasoningTextDone { item_id, .. } => {
                let Some(block) = item_id.as_ref().and_then(|id| self.reasoning_blocks.remove(id)) else {
                    return frames;
                };

                if let Some(signature) = block.signature {
                    frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
                        index: block.block_index,
                        delta: anthropic::BlockDelta::SignatureDelta { signature },
                    }));
                }
                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStop {
                    index: block.block_index,
                }));
            }

            OutputItemAdded { item, .. } => {
                if let responses::OutputItem::FunctionCall {
                    id, call_id, name, ..
                } = item
                {
                    self.ensure_started(&mut frames);
                    self.close_text_block(&mut frames);
                    self.saw_tool = true;

                    let item_id = id
                        .or(call_id)
                        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));

                    let index = self.block_index;
                    self.block_index += 1;

                    let position = self.tool_blocks.len();
                    let name = name
                        .filter(|n| !n.is_empty())
                        .or_else(|| self.catalog.name_at(position).map(str::to_string))
                        .unwrap_or_default();

                    self.tool_blocks.insert(item_id.clone(), ToolBlock { block_index: index });

                    frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStart {
                        index,
                        content_block: anthropic::ContentBlock::ToolUse {
                            id: item_id,
                            name,
                            input: Value::Object(Default::default()),
                        },
                    }));
                }
            }

            FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let Some(block) = item_id.as_ref().and_then(|id| self.tool_blocks.get(id)) else {
                    return frames;
                };

                let index = block.block_index;

                frames.extend(self.emit(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::BlockDelta::InputJsonDelta { partial_json: delta },
                }));
            }

            OutputItemDone { item, .. } => match item {
                responses::OutputItem::FunctionCall { id, call_id, .. } => {
                    let key = id.or(call_id).unwrap_or_default();
                    if let Some(block) = self.tool_blocks.get(&key) {
                        let index = block.block_index;
                        frames.extend(self.emit(anthropic::StreamEvent::ContentBlockStop { index }));
                    }
                }
                responses::OutputItem::Message { .. } => {
                    self.close_text_block(&mut frames);
                }
                _ => {}
            },

            Completed { response, .. } | Incomplete { response, .. } | Failed { response, .. } => {
                self.ensure_started(&mut frames);

                if response.status != responses::ResponseStatus::InProgress {
                    self.status = response.status;
                }
                if response.usage.is_some() {
                    self.usage = response.usage.clone();
                }

                frames.extend(self.terminal_frames());
            }

            _ => {}
        }

        frames
    }

    fn terminal_frames(&mut self) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();

        for item in self.scanner.finish() {
            match item {
                ScanItem::Text(text) => self.text_delta(text, &mut frames),
                ScanItem::Reasoning(segment) => self.thinking_block(segment.text, segment.signature, &mut frames),
            }
        }
        self.close_text_block(&mut frames);

        let stop_reason = if self.saw_tool {
            anthropic::StopReason::ToolUse
        } else if self.status == responses::ResponseStatus::Incomplete {
            anthropic::StopReason::MaxTokens
        } else {
            anthropic::StopReason::EndTurn
        };

        frames.extend(self.emit(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaPayload {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: self.usage.as_ref().map(usage::responses_to_anthropic),
        }));
        frames.extend(self.emit(anthropic::StreamEvent::MessageStop));

        frames
    }
}

impl StreamAdapter for ResponsesToAnthropic {
    fn process(&mut self, event: Value) -> Vec<OutFrame> {
        match decode_event::<responses::StreamEvent>(event) {
            Ok(event) => self.process_event(event),
            Err(Some(error_frame)) => vec![error_frame],
            Err(None) => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<OutFrame> {
        let mut frames = Vec::new();
        self.ensure_started(&mut frames);
        frames.extend(self.terminal_frames());
        frames
    }

    fn emits_done_marker(&self) -> bool {
        false
    }
}
