//! Responses stream → Chat Completions chunk stream.

use std::collections::HashMap;

use serde_json::Value;

use super::{OutFrame, StreamAdapter, decode_event, to_frame};
use crate::{
    convert::{
        thinking::{ScanItem, ThinkingScanner, ThinkingSegment, thinking_xml_enabled},
        tools::ToolCatalog,
        usage,
    },
    protocol::{chat, responses},
};

const STREAM_CHUNK_ID: &str = "chatcmpl-stream";
const CLOSE_TAG: &str = "</thinking>";

/// State machine converting `response.*` events into Chat chunks.
///
/// Tool calls are tracked per upstream item id; when the upstream starts
/// streaming arguments before naming the call, the name is inferred from
/// the request's tool catalog, and a trailing patch chunk fills it in if
/// inference only succeeds at item completion. Reasoning summaries and
/// inline `<thinking>` runs both surface as XML in the assistant text.
pub struct ResponsesToChat {
    model: String,
    role_sent: bool,
    catalog: ToolCatalog,
    scanner: ThinkingScanner,
    tool_states: HashMap<String, ToolState>,
    tool_order: Vec<String>,
    saw_tool_event: bool,
    reasoning_parts: HashMap<(String, u32), ReasoningPart>,
    finished: bool,
}

#[derive(Debug, Default)]
struct ToolState {
    id: String,
    index: u32,
    name: String,
    arguments: String,
    initial_emitted: bool,
    name_emitted: bool,
    arguments_emitted: bool,
}

#[derive(Debug, Default)]
struct ReasoningPart {
    buffer: String,
    signature: Option<String>,
}

impl ResponsesToChat {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            model: String::new(),
            role_sent: false,
            catalog,
            scanner: ThinkingScanner::new(),
            tool_states: HashMap::new(),
            tool_order: Vec::new(),
            saw_tool_event: false,
            reasoning_parts: HashMap::new(),
            finished: false,
        }
    }

    fn chunk(&mut self, delta: chat::DeltaMessage, finish_reason: Option<chat::FinishReason>) -> chat::ChatCompletionChunk {
        let mut chunk = chat::ChatCompletionChunk::new(STREAM_CHUNK_ID, self.model.clone());
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

        let chunk = self.chunk(delta, None);
        to_frame(None, &chunk)
    }

    fn tool_frame(&mut self, index: u32, id: &str, name: &str, arguments: String) -> Option<OutFrame> {
        let delta = chat::DeltaMessage {
            role: (!self.role_sent).then_some(chat::ChatRole::Assistant),
            content: None,
            tool_calls: Some(vec![chat::ToolCallDelta {
                index,
                id: Some(id.to_string()),
                r#type: Some(chat::ToolType::Function),
                function: Some(chat::FunctionCallDelta {
                    name: Some(name.to_string()),
                    arguments: Some(arguments),
                }),
            }]),
        };
        self.role_sent = true;

        let chunk = self.chunk(delta, None);
        to_frame(None, &chunk)
    }

    /// Close out one reasoning part: wrap the buffered text in XML and
    /// emit it as assistant content, body and closing tag as separate
    /// chunks.
    fn reasoning_frames(&mut self, item_id: &str, summary_index: u32, final_text: Option<String>) -> Vec<OutFrame> {
        let part = self
            .reasoning_parts
            .entry((item_id.to_string(), summary_index))
            .or_default();

        let text = match final_text.filter(|t| !t.is_empty()) {
            Some(text) => {
                part.buffer.clear();
                text
            }
            None => std::mem::take(&mut part.buffer),
        };

        if text.is_empty() || !thinking_xml_enabled() {
            return Vec::new();
        }

        let signature = part.signature.take();
        let xml = ThinkingSegment::new(text, signature).to_xml();
        let body = xml.strip_suffix(CLOSE_TAG).unwrap_or(&xml).to_string();

        [body, CLOSE_TAG.to_string()]
            .into_iter()
            .filter_map(|piece| self.text_frame(piece))
            .collect()
    }

    fn ensure_tool_state(&mut self, item_id: &str) -> &mut ToolState {
        if !self.tool_states.contains_key(item_id) {
            let index = match self.tool_order.iter().position(|id| id == item_id) {
                Some(index) => index as u32,
                None => {
                    self.tool_order.push(item_id.to_string());
                    (self.tool_order.len() - 1) as u32
                }
            };

            self.tool_states.insert(
                item_id.to_string(),
                ToolState {
                    id: item_id.to_string(),
                    index,
                    ..Default::default()
                },
            );
        }

        self.tool_states.get_mut(item_id).expect("state just inserted")
    }

    fn process_event(&mut self, event: responses::StreamEvent) -> Vec<OutFrame> {
        use responses::StreamEvent::*;

        match event {
            Created { response, .. } => {
                if !response.model.is_empty() {
                    self.model = response.model;
                }
                if let Some(tools) = &response.tools
                    && !tools.is_empty()
                {
                    self.catalog = ToolCatalog::from_responses(tools);
                }
                Vec::new()
            }

            ReasoningSummaryPartAdded {
                item_id,
                summary_index,
                part,
                ..
            } => {
                let Some(item_id) = item_id else { return Vec::new() };
                let entry = self
                    .reasoning_parts
                    .entry((item_id, summary_index.unwrap_or(0)))
                    .or_default();

                entry.buffer.clear();
                entry.signature = part.as_ref().and_then(part_signature);
                Vec::new()
            }

            ReasoningSummaryTextDelta {
                item_id,
                summary_index,
                delta,
                ..
            }
            | ReasoningTextDelta {
                item_id,
                summary_index,
                delta,
                ..
            } => {
                if let Some(item_id) = item_id
                    && !delta.is_empty()
                {
                    self.reasoning_parts
                        .entry((item_id, summary_index.unwrap_or(0)))
                        .or_default()
                        .buffer
                        .push_str(&delta);
                }
                Vec::new()
            }

            ReasoningSummaryTextDone {
                item_id,
                summary_index,
                text,
                ..
            }
            | ReasoningTextDone {
                item_id,
                summary_index,
                text,
                ..
            } => match item_id {
                Some(item_id) => self.reasoning_frames(&item_id, summary_index.unwrap_or(0), text),
                None => Vec::new(),
            },

            OutputTextDelta { delta, .. } => {
                let items = self.scanner.feed(&delta);
                self.scan_items_to_frames(items)
            }

            OutputItemAdded { item, .. } => self.on_function_item(item, false),

            FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let Some(item_id) = item_id else { return Vec::new() };
                self.saw_tool_event = true;

                let guess_input;
                {
                    let state = self.ensure_tool_state(&item_id);
                    state.arguments.push_str(&delta);
                    guess_input = state.name.is_empty().then(|| state.arguments.clone());
                }

                if let Some(arguments) = guess_input
                    && let Some(guessed) = self.catalog.guess(&arguments).map(str::to_string)
                {
                    self.ensure_tool_state(&item_id).name = guessed;
                }

                let state = self.ensure_tool_state(&item_id);
                if state.initial_emitted && !delta.is_empty() {
                    state.arguments_emitted = true;
                    let (index, id, name) = (state.index, state.id.clone(), state.name.clone());
                    self.tool_frame(index, &id, &name, delta).into_iter().collect()
                } else {
                    Vec::new()
                }
            }

            FunctionCallArgumentsDone { item_id, arguments, .. } => {
                let Some(item_id) = item_id else { return Vec::new() };
                let Some(arguments) = arguments.filter(|a| !a.is_empty()) else {
                    return Vec::new();
                };
                self.saw_tool_event = true;

                let already_emitted = {
                    let state = self.ensure_tool_state(&item_id);
                    state.arguments_emitted
                };
                if already_emitted {
                    return Vec::new();
                }

                if let Some(guessed) = self.catalog.guess(&arguments).map(str::to_string) {
                    let state = self.ensure_tool_state(&item_id);
                    if state.name.is_empty() {
                        state.name = guessed;
                    }
                }

                let state = self.ensure_tool_state(&item_id);
                state.arguments = arguments.clone();
                state.arguments_emitted = true;
                state.initial_emitted = true;
                if !state.name.is_empty() {
                    state.name_emitted = true;
                }
                let (index, id, name) = (state.index, state.id.clone(), state.name.clone());

                self.tool_frame(index, &id, &name, arguments).into_iter().collect()
            }

            OutputItemDone { item, .. } => {
                if matches!(item, responses::OutputItem::Reasoning { .. }) {
                    if !thinking_xml_enabled() {
                        return Vec::new();
                    }

                    let payload = serde_json::to_value(&item).unwrap_or(Value::Null);
                    crate::convert::reasoning::extract_reasoning(&payload)
                        .into_iter()
                        .filter_map(|segment| self.text_frame(segment.to_xml()))
                        .collect()
                } else {
                    self.on_function_item(item, true)
                }
            }

            Completed { response, .. } | Incomplete { response, .. } | Failed { response, .. } => {
                let mut frames: Vec<OutFrame> = self
                    .scanner
                    .finish()
                    .into_iter()
                    .filter_map(|item| self.scan_item_to_frame(item))
                    .flatten()
                    .collect();

                let usage = response.usage.as_ref().map(usage::responses_to_chat);

                let finish_reason = if self.saw_tool_event || !self.tool_states.is_empty() {
                    chat::FinishReason::ToolCalls
                } else if response.status == responses::ResponseStatus::Incomplete {
                    chat::FinishReason::Length
                } else {
                    chat::FinishReason::Stop
                };

                let mut chunk = self.chunk(chat::DeltaMessage::default(), Some(finish_reason));
                chunk.usage = usage;
                self.finished = true;

                frames.extend(to_frame(None, &chunk));
                frames
            }

            InProgress { .. } | OutputTextDone { .. } | Unknown(_) => Vec::new(),
        }
    }

    /// Shared handling for `output_item.added` and `output_item.done`
    /// function-call items.
    fn on_function_item(&mut self, item: responses::OutputItem, done: bool) -> Vec<OutFrame> {
        let responses::OutputItem::FunctionCall {
            id,
            call_id,
            name,
            arguments,
            ..
        } = item
        else {
            return Vec::new();
        };

        self.saw_tool_event = true;

        let item_id = id
            .or(call_id)
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

        let arguments = arguments
            .as_ref()
            .map(|a| match a {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            })
            .unwrap_or_default();

        // Fill in the name: explicit wins, then positional catalog lookup,
        // then key-set inference over buffered arguments.
        {
            let state = self.ensure_tool_state(&item_id);

            if state.name.is_empty()
                && let Some(name) = name.filter(|n| !n.is_empty())
            {
                state.name = name;
            }

            if done {
                if !arguments.is_empty() {
                    state.arguments = arguments.clone();
                }
            } else if !arguments.is_empty() {
                state.arguments.push_str(&arguments);
            }
        }

        // Positional lookup only applies while the item is still open; a
        // completed item is matched on its argument keys alone.
        let (positional, buffered) = {
            let state = self.ensure_tool_state(&item_id);
            (
                (!done && state.name.is_empty()).then_some(state.index as usize),
                state.name.is_empty().then(|| state.arguments.clone()),
            )
        };

        if let Some(index) = positional
            && let Some(candidate) = self.catalog.name_at(index).map(str::to_string)
        {
            self.ensure_tool_state(&item_id).name = candidate;
        } else if let Some(buffered) = buffered
            && let Some(guessed) = self.catalog.guess(&buffered).map(str::to_string)
        {
            self.ensure_tool_state(&item_id).name = guessed;
        }

        let mut frames = Vec::new();

        let (emit_initial, emit_args_done, emit_name_patch) = {
            let state = self.ensure_tool_state(&item_id);
            (
                !done && !state.initial_emitted,
                done && !state.arguments_emitted && !state.arguments.is_empty(),
                done && !state.name.is_empty() && !state.name_emitted,
            )
        };

        if emit_initial {
            let state = self.ensure_tool_state(&item_id);
            state.initial_emitted = true;
            if !state.name.is_empty() {
                state.name_emitted = true;
            }
            if !arguments.is_empty() {
                state.arguments_emitted = true;
            }
            let (index, id, name) = (state.index, state.id.clone(), state.name.clone());
            frames.extend(self.tool_frame(index, &id, &name, arguments.clone()));
        }

        if emit_args_done {
            let state = self.ensure_tool_state(&item_id);
            state.arguments_emitted = true;
            state.initial_emitted = true;
            let (index, id, name, args) = (state.index, state.id.clone(), state.name.clone(), state.arguments.clone());
            frames.extend(self.tool_frame(index, &id, &name, args));
        }

        // A name resolved only at completion goes out as a trailing patch
        // chunk with empty arguments.
        if emit_name_patch {
            let state = self.ensure_tool_state(&item_id);
            state.name_emitted = true;
            let (index, id, name) = (state.index, state.id.clone(), state.name.clone());
            frames.extend(self.tool_frame(index, &id, &name, String::new()));
        }

        frames
    }

    fn scan_items_to_frames(&mut self, items: Vec<ScanItem>) -> Vec<OutFrame> {
        items
            .into_iter()
            .filter_map(|item| self.scan_item_to_frame(item))
            .flatten()
            .collect()
    }

    fn scan_item_to_frame(&mut self, item: ScanItem) -> Option<Vec<OutFrame>> {
        match item {
            ScanItem::Text(text) => self.text_frame(text).map(|frame| vec![frame]),
            ScanItem::Reasoning(segment) => {
                if !thinking_xml_enabled() {
                    return None;
                }

                let xml = segment.to_xml();
                let body = xml.strip_suffix(CLOSE_TAG).unwrap_or(&xml).to_string();
                let frames: Vec<OutFrame> = [body, CLOSE_TAG.to_string()]
                    .into_iter()
                    .filter_map(|piece| self.text_frame(piece))
                    .collect();
                (!frames.is_empty()).then_some(frames)
            }
        }
    }
}

fn part_signature(part: &Value) -> Option<String> {
    if let Some(signature) = part.get("signature").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Some(signature.to_string());
    }

    if part.get("type").and_then(Value::as_str) == Some("signature") {
        return part
            .get("text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    None
}

impl StreamAdapter for ResponsesToChat {
    fn process(&mut self, event: Value) -> Vec<OutFrame> {
        match decode_event::<responses::StreamEvent>(event) {
            Ok(event) => self.process_event(event),
            Err(Some(error_frame)) => vec![error_frame],
            Err(None) => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<OutFrame> {
        if self.finished {
            // The terminal event already flushed everything.
            return Vec::new();
        }

        let items = self.scanner.finish();
        self.scan_items_to_frames(items)
    }

    fn emits_done_marker(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frames_to_chunks(frames: &[OutFrame]) -> Vec<chat::ChatCompletionChunk> {
        frames
            .iter()
            .map(|frame| serde_json::from_value(frame.data.clone()).unwrap())
            .collect()
    }

    fn weather_catalog() -> ToolCatalog {
        let tools: Vec<chat::Tool> = serde_json::from_value(json!([{
            "type": "function",
            "function": {
                "name": "get_weather",
                "parameters": {"type": "object", "properties": {"location": {"type": "string"}}}
            }
        }]))
        .unwrap();
        ToolCatalog::from_chat(&tools)
    }

    #[test]
    fn text_stream_emits_role_exactly_once() {
        let mut converter = ResponsesToChat::new(ToolCatalog::default());

        let mut frames = converter.process(json!({
            "type": "response.created",
            "response": {"id": "r1", "object": "response", "created_at": 0, "status": "in_progress", "model": "gpt-5"}
        }));
        frames.extend(converter.process(json!({
            "type": "response.output_text.delta", "item_id": "m1", "delta": "Hel"
        })));
        frames.extend(converter.process(json!({
            "type": "response.output_text.delta", "item_id": "m1", "delta": "lo"
        })));

        let chunks = frames_to_chunks(&frames);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.role, Some(chat::ChatRole::Assistant));
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].choices[0].delta.role, None);
        assert_eq!(chunks[1].model, "gpt-5");
    }

    #[test]
    fn tool_name_resolved_from_request_catalog() {
        let mut converter = ResponsesToChat::new(weather_catalog());

        let mut frames = converter.process(json!({
            "type": "response.output_item.added",
            "item": {"type": "function_call", "id": "call_1"}
        }));
        frames.extend(converter.process(json!({
            "type": "response.function_call_arguments.delta", "item_id": "call_1", "delta": "{\"loc"
        })));
        frames.extend(converter.process(json!({
            "type": "response.function_call_arguments.delta", "item_id": "call_1", "delta": "ation\":\"SF\"}"
        })));
        frames.extend(converter.process(json!({
            "type": "response.completed",
            "response": {
                "id": "r1", "object": "response", "created_at": 0, "status": "completed", "model": "gpt-5",
                "usage": {"input_tokens": 9, "output_tokens": 4, "total_tokens": 13}
            }
        })));

        let chunks = frames_to_chunks(&frames);

        // Initial tool chunk carries the positionally inferred name.
        let first_call = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(
            first_call[0].function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );
        assert_eq!(first_call[0].id.as_deref(), Some("call_1"));

        // Terminal chunk: tool_calls finish reason and the only usage.
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(chat::FinishReason::ToolCalls));
        assert_eq!(last.usage.as_ref().unwrap().prompt_tokens, 9);

        let usage_count = chunks.iter().filter(|c| c.usage.is_some()).count();
        assert_eq!(usage_count, 1);
    }

    #[test]
    fn late_name_inference_emits_patch_chunk() {
        // No positional match: two tools, arguments decide.
        let tools: Vec<chat::Tool> = serde_json::from_value(json!([
            {"type": "function", "function": {"name": "alpha", "parameters": {"properties": {"x": {}}}}},
            {"type": "function", "function": {"name": "beta", "parameters": {"properties": {"y": {}}}}}
        ]))
        .unwrap();
        let mut converter = ResponsesToChat::new(ToolCatalog::from_chat(&tools));

        // The item arrives already completed, so the name comes from the
        // argument key-set, not from the declaration position.
        let frames = converter.process(json!({
            "type": "response.output_item.done",
            "item": {"type": "function_call", "id": "call_9", "arguments": "{\"y\": 1}"}
        }));

        let chunks = frames_to_chunks(&frames);
        assert!(!chunks.is_empty());

        let names: Vec<_> = chunks
            .iter()
            .flat_map(|c| c.choices[0].delta.tool_calls.iter().flatten())
            .filter_map(|tc| tc.function.as_ref().and_then(|f| f.name.clone()))
            .collect();
        assert!(names.contains(&"beta".to_string()));
    }

    #[test]
    fn inline_thinking_in_output_text_becomes_reasoning() {
        let mut converter = ResponsesToChat::new(ToolCatalog::default());

        let mut frames = Vec::new();
        for delta in ["pre<thin", "king signature=\"s\">hidden</thin", "king>post"] {
            frames.extend(converter.process(json!({
                "type": "response.output_text.delta", "item_id": "m1", "delta": delta
            })));
        }
        frames.extend(converter.finish());

        let chunks = frames_to_chunks(&frames);
        let content: String = chunks
            .iter()
            .filter_map(|c| c.choices[0].delta.content.clone())
            .collect();

        assert_eq!(content, "pre<thinking signature=\"s\">hidden</thinking>post");
    }

    #[test]
    fn upstream_error_event_is_forwarded_verbatim() {
        let mut converter = ResponsesToChat::new(ToolCatalog::default());

        let error = json!({"error": {"type": "overloaded_error", "message": "try later"}});
        let frames = converter.process(error.clone());

        assert_eq!(frames, vec![OutFrame::error(error)]);
    }
}
