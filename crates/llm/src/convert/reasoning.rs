//! Extraction of reasoning segments from Responses `reasoning` payloads.
//!
//! Upstreams disagree about the shape of reasoning summaries: flat
//! `summary_text` parts, nested `summary_group` containers, bare `text`
//! nodes, or standalone `signature` entries that apply to their siblings.
//! The walker flattens any of these into ordered [`ThinkingSegment`]s.
//!
//! Traversal uses an explicit work stack plus a visited set keyed on node
//! address, which keeps the worst case bounded regardless of how deeply a
//! provider nests its summary tree.

use std::collections::HashSet;

use serde_json::Value;

use super::thinking::{ThinkingSegment, merge_segments};

/// Extract reasoning segments from a reasoning output payload.
///
/// Looks at `summary` first, then treats the payload itself as a sequence,
/// then falls back to a bare `text` field or a nested `reasoning` value.
pub fn extract_reasoning(payload: &Value) -> Vec<ThinkingSegment> {
    if payload.is_null() {
        return Vec::new();
    }

    if let Some(summary) = payload.get("summary") {
        let segments = collect_segments(summary);
        if !segments.is_empty() {
            return segments;
        }
    }

    if payload.is_array() {
        let segments = collect_segments(payload);
        if !segments.is_empty() {
            return segments;
        }
    }

    if let Some(text) = payload.get("text").and_then(Value::as_str)
        && !text.is_empty()
    {
        return vec![ThinkingSegment::new(text, None)];
    }

    if let Some(nested) = payload.get("reasoning")
        && !nested.is_null()
    {
        return extract_reasoning(nested);
    }

    Vec::new()
}

enum Frame<'a> {
    Node {
        value: &'a Value,
        signature: Option<String>,
    },
    Seq {
        items: &'a [Value],
        idx: usize,
        signature: Option<String>,
        /// First segment index produced under this sequence; a later
        /// `signature` sibling re-signs everything from here.
        start: usize,
    },
}

/// Flatten an arbitrary summary node into ordered segments.
pub fn collect_segments(source: &Value) -> Vec<ThinkingSegment> {
    let mut segments: Vec<ThinkingSegment> = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack = vec![Frame::Node {
        value: source,
        signature: None,
    }];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Seq {
                items,
                idx,
                mut signature,
                mut start,
            } => {
                let Some(child) = items.get(idx) else {
                    continue;
                };

                // A `signature` sibling applies retroactively to segments
                // already produced under this sequence.
                if child.get("type").and_then(Value::as_str) == Some("signature") {
                    let candidate = child
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .or_else(|| child.get("signature").and_then(Value::as_str).filter(|s| !s.is_empty()));

                    if let Some(candidate) = candidate {
                        signature = Some(candidate.to_string());
                        for segment in &mut segments[start..] {
                            segment.signature = signature.clone();
                        }
                        start = segments.len();
                    }
                }

                stack.push(Frame::Seq {
                    items,
                    idx: idx + 1,
                    signature: signature.clone(),
                    start,
                });
                stack.push(Frame::Node {
                    value: child,
                    signature,
                });
            }

            Frame::Node { value, signature } => {
                let address = value as *const Value as usize;
                if (value.is_object() || value.is_array()) && !visited.insert(address) {
                    continue;
                }

                if let Some(items) = value.as_array() {
                    stack.push(Frame::Seq {
                        items,
                        idx: 0,
                        signature,
                        start: segments.len(),
                    });
                    continue;
                }

                let Some(object) = value.as_object() else {
                    continue;
                };

                let node_type = object.get("type").and_then(Value::as_str);
                let text = object.get("text").and_then(Value::as_str).filter(|s| !s.is_empty());

                let mut next_signature = signature;
                if let Some(sig) = object.get("signature").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                    next_signature = Some(sig.to_string());
                }

                if node_type == Some("signature") {
                    if let Some(text) = text {
                        next_signature = Some(text.to_string());
                    }
                    if let Some(content) = object.get("content").filter(|v| v.is_array() || v.is_object()) {
                        stack.push(Frame::Node {
                            value: content,
                            signature: next_signature,
                        });
                    }
                    continue;
                }

                if matches!(node_type, Some("summary_group") | Some("group")) {
                    if let Some(content) = object.get("content") {
                        stack.push(Frame::Node {
                            value: content,
                            signature: next_signature,
                        });
                    }
                    continue;
                }

                let mut emitted = false;
                if let Some(text) = text {
                    segments.push(ThinkingSegment::new(text, next_signature.clone()));
                    emitted = true;
                }

                if !emitted
                    && let Some(value_text) = object.get("value").and_then(Value::as_str).filter(|s| !s.is_empty())
                {
                    segments.push(ThinkingSegment::new(value_text, next_signature.clone()));
                }

                // Children are pushed in reverse so `summary` is walked
                // before `content` before `reasoning`.
                for key in ["reasoning", "content", "summary"] {
                    if let Some(nested) = object.get(key).filter(|v| v.is_array() || v.is_object()) {
                        stack.push(Frame::Node {
                            value: nested,
                            signature: next_signature.clone(),
                        });
                    }
                }
            }
        }
    }

    merge_segments(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_summary_text_parts() {
        let payload = json!({
            "summary": [
                {"type": "summary_text", "text": "first "},
                {"type": "summary_text", "text": "second"}
            ]
        });

        let segments = extract_reasoning(&payload);
        assert_eq!(segments, vec![ThinkingSegment::new("first second", None)]);
    }

    #[test]
    fn part_level_signature_is_kept() {
        let payload = json!({
            "summary": [
                {"type": "summary_text", "text": "signed", "signature": "sig-1"},
                {"type": "summary_text", "text": "unsigned"}
            ]
        });

        let segments = extract_reasoning(&payload);
        assert_eq!(
            segments,
            vec![
                ThinkingSegment::new("signed", Some("sig-1".to_string())),
                ThinkingSegment::new("unsigned", None),
            ]
        );
    }

    #[test]
    fn signature_sibling_applies_retroactively() {
        let payload = json!({
            "summary": [
                {"type": "summary_text", "text": "before"},
                {"type": "signature", "text": "sig-late"},
                {"type": "summary_text", "text": "after"}
            ]
        });

        // Both segments end up signed and merge into one.
        let segments = extract_reasoning(&payload);
        assert_eq!(
            segments,
            vec![ThinkingSegment::new("beforeafter", Some("sig-late".to_string()))]
        );
    }

    #[test]
    fn nested_summary_groups_flatten() {
        let payload = json!({
            "summary": [{
                "type": "summary_group",
                "content": [
                    {"type": "text", "text": "inner", "signature": "g"},
                    {"type": "summary_group", "content": [{"type": "text", "text": " deep"}]}
                ]
            }]
        });

        // The signature on a part applies to that part only; the sibling
        // group inherits nothing.
        let segments = extract_reasoning(&payload);
        assert_eq!(
            segments,
            vec![
                ThinkingSegment::new("inner", Some("g".to_string())),
                ThinkingSegment::new(" deep", None),
            ]
        );
    }

    #[test]
    fn bare_text_payload_falls_through() {
        let payload = json!({"text": "just text"});
        assert_eq!(extract_reasoning(&payload), vec![ThinkingSegment::new("just text", None)]);
    }

    #[test]
    fn adjacent_segments_with_same_signature_merge() {
        let payload = json!({
            "summary": [
                {"type": "summary_text", "text": "a", "signature": "s"},
                {"type": "summary_text", "text": "b", "signature": "s"}
            ]
        });

        assert_eq!(
            extract_reasoning(&payload),
            vec![ThinkingSegment::new("ab", Some("s".to_string()))]
        );
    }
}
