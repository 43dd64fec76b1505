//! Reasoning ("thinking") serialization.
//!
//! OpenAI Chat Completions has no native reasoning container, so reasoning
//! content travels inline in assistant text as
//! `<thinking signature="…">…</thinking>`. The opening tag may carry a
//! signature attribute; the closing tag never carries attributes; nested
//! openers are treated as literal text. Streams may split a tag across
//! chunk boundaries, which the incremental [`ThinkingScanner`] tolerates.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

fn thinking_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        RegexBuilder::new(r#"<thinking(?:\s+signature="([^"]*)")?>(.*?)</thinking>"#)
            .dot_matches_new_line(true)
            .build()
            .expect("static thinking pattern")
    })
}

fn open_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        RegexBuilder::new(r#"^<thinking(?:\s+signature="([^"]*)")?\s*>"#)
            .case_insensitive(true)
            .build()
            .expect("static thinking open pattern")
    })
}

const OPEN_TAG_START: &str = "<thinking";
const CLOSE_TAG: &str = "</thinking>";

/// A reasoning segment with its opaque signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingSegment {
    pub text: String,
    pub signature: Option<String>,
}

impl ThinkingSegment {
    pub fn new(text: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            text: text.into(),
            signature: signature.filter(|s| !s.is_empty()),
        }
    }

    /// Serialize as `<thinking …>…</thinking>` XML. An empty signature
    /// omits the attribute.
    pub fn to_xml(&self) -> String {
        match self.signature.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(signature) => format!(r#"<thinking signature="{signature}">{}</thinking>"#, self.text),
            None => format!("<thinking>{}</thinking>", self.text),
        }
    }
}

/// A piece of mixed assistant content.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Thinking(ThinkingSegment),
}

/// Split assistant text into ordered text and thinking segments.
pub fn split_segments(content: &str) -> Vec<Segment> {
    if content.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut last_idx = 0;

    for captures in thinking_pattern().captures_iter(content) {
        let whole = captures.get(0).expect("match group 0");

        if whole.start() > last_idx {
            segments.push(Segment::Text(content[last_idx..whole.start()].to_string()));
        }

        let signature = captures.get(1).map(|m| m.as_str().to_string());
        let text = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        segments.push(Segment::Thinking(ThinkingSegment::new(text, signature)));

        last_idx = whole.end();
    }

    if last_idx < content.len() {
        segments.push(Segment::Text(content[last_idx..].to_string()));
    }

    if segments.is_empty() {
        segments.push(Segment::Text(content.to_string()));
    }

    segments
}

/// Merge adjacent thinking segments that share a signature.
pub fn merge_segments(segments: Vec<ThinkingSegment>) -> Vec<ThinkingSegment> {
    let mut merged: Vec<ThinkingSegment> = Vec::new();

    for segment in segments {
        if segment.text.is_empty() {
            continue;
        }

        match merged.last_mut() {
            Some(last) if last.signature == segment.signature => last.text.push_str(&segment.text),
            _ => merged.push(segment),
        }
    }

    merged
}

/// Whether `<thinking>` serialization into OpenAI output is enabled.
///
/// Controlled by `LLM__OPENAI_THINKING_XML`, falling back to
/// `OPENAI_STREAM_ENABLE_THINKING_SERIALIZATION`. Anything other than
/// `0`/`false`/`no`/`off` (case-insensitive) counts as enabled; the
/// default is enabled.
pub fn thinking_xml_enabled() -> bool {
    let toggle = std::env::var("LLM__OPENAI_THINKING_XML")
        .or_else(|_| std::env::var("OPENAI_STREAM_ENABLE_THINKING_SERIALIZATION"))
        .ok();

    parse_toggle(toggle.as_deref())
}

fn parse_toggle(value: Option<&str>) -> bool {
    match value {
        Some(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "0" | "false" | "no" | "off")
        }
        None => true,
    }
}

/// Output of one scanner step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanItem {
    /// Plain assistant text, safe to forward immediately.
    Text(String),
    /// A completed reasoning block.
    Reasoning(ThinkingSegment),
}

/// Incremental `<thinking>` scanner for streamed assistant text.
///
/// Bytes belonging to a potentially incomplete tag are held back until the
/// next chunk decides whether they form a tag, so a tag split across
/// chunks parses identically to an unsplit one.
#[derive(Debug, Default)]
pub struct ThinkingScanner {
    carry: String,
    open: bool,
    signature: Option<String>,
    buffer: String,
}

impl ThinkingScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the scanner is currently inside a thinking block.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Feed a chunk of streamed text.
    pub fn feed(&mut self, chunk: &str) -> Vec<ScanItem> {
        let mut items = Vec::new();
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(chunk);

        let mut rest = input.as_str();

        loop {
            if self.open {
                match find_case_insensitive(rest, CLOSE_TAG) {
                    Some(pos) => {
                        self.buffer.push_str(&rest[..pos]);
                        items.push(ScanItem::Reasoning(ThinkingSegment::new(
                            std::mem::take(&mut self.buffer),
                            self.signature.take(),
                        )));
                        self.open = false;
                        rest = &rest[pos + CLOSE_TAG.len()..];
                    }
                    None => {
                        let holdback = partial_suffix_len(rest, CLOSE_TAG);
                        self.buffer.push_str(&rest[..rest.len() - holdback]);
                        self.carry = rest[rest.len() - holdback..].to_string();
                        break;
                    }
                }
            } else {
                match find_case_insensitive(rest, OPEN_TAG_START) {
                    Some(pos) => {
                        if pos > 0 {
                            items.push(ScanItem::Text(rest[..pos].to_string()));
                        }

                        let candidate = &rest[pos..];
                        match open_pattern().captures(candidate) {
                            Some(captures) => {
                                let whole = captures.get(0).expect("match group 0");
                                self.open = true;
                                self.signature = captures
                                    .get(1)
                                    .map(|m| m.as_str().to_string())
                                    .filter(|s| !s.is_empty());
                                self.buffer.clear();
                                rest = &candidate[whole.end()..];
                            }
                            None if candidate.contains('>') => {
                                // A `<thinking…>`-looking run that is not a
                                // valid opener stays literal text.
                                let lt_len = '<'.len_utf8();
                                items.push(ScanItem::Text(candidate[..lt_len].to_string()));
                                rest = &candidate[lt_len..];
                            }
                            None => {
                                // Tag may still be completing in the next
                                // chunk.
                                self.carry = candidate.to_string();
                                break;
                            }
                        }
                    }
                    None => {
                        let holdback = partial_suffix_len(rest, OPEN_TAG_START);
                        let text = &rest[..rest.len() - holdback];
                        if !text.is_empty() {
                            items.push(ScanItem::Text(text.to_string()));
                        }
                        self.carry = rest[rest.len() - holdback..].to_string();
                        break;
                    }
                }
            }

            if rest.is_empty() {
                break;
            }
        }

        items
    }

    /// Flush state at end of stream. An unterminated block is emitted as
    /// reasoning with whatever text accumulated.
    pub fn finish(&mut self) -> Vec<ScanItem> {
        let mut items = Vec::new();
        let carry = std::mem::take(&mut self.carry);

        if self.open {
            self.buffer.push_str(&carry);
            if !self.buffer.is_empty() || self.signature.is_some() {
                items.push(ScanItem::Reasoning(ThinkingSegment::new(
                    std::mem::take(&mut self.buffer),
                    self.signature.take(),
                )));
            }
            self.open = false;
        } else if !carry.is_empty() {
            items.push(ScanItem::Text(carry));
        }

        items
    }
}

/// Byte offset of the first case-insensitive occurrence of `needle`.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

/// Length of the longest suffix of `haystack` that is a proper prefix of
/// `needle` (case-insensitive). These bytes might belong to a tag still
/// arriving.
fn partial_suffix_len(haystack: &str, needle: &str) -> usize {
    let lower = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let max = needle.len().saturating_sub(1).min(lower.len());

    for len in (1..=max).rev() {
        if !lower.is_char_boundary(lower.len() - len) {
            continue;
        }
        if needle.starts_with(&lower[lower.len() - len..]) {
            return len;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_round_trip_preserves_signature() {
        let segment = ThinkingSegment::new("deep thought", Some("sig-abc".to_string()));
        let xml = segment.to_xml();
        assert_eq!(xml, r#"<thinking signature="sig-abc">deep thought</thinking>"#);

        let parsed = split_segments(&xml);
        assert_eq!(parsed, vec![Segment::Thinking(segment)]);
    }

    #[test]
    fn empty_signature_omits_the_attribute() {
        let segment = ThinkingSegment::new("quick", None);
        assert_eq!(segment.to_xml(), "<thinking>quick</thinking>");

        let segment = ThinkingSegment::new("quick", Some(String::new()));
        assert_eq!(segment.to_xml(), "<thinking>quick</thinking>");
    }

    #[test]
    fn split_interleaves_text_and_thinking() {
        let content = r#"before<thinking signature="s1">inner</thinking>after"#;
        let segments = split_segments(content);

        assert_eq!(
            segments,
            vec![
                Segment::Text("before".to_string()),
                Segment::Thinking(ThinkingSegment::new("inner", Some("s1".to_string()))),
                Segment::Text("after".to_string()),
            ]
        );
    }

    #[test]
    fn merge_joins_adjacent_segments_with_same_signature() {
        let merged = merge_segments(vec![
            ThinkingSegment::new("a", Some("s".to_string())),
            ThinkingSegment::new("b", Some("s".to_string())),
            ThinkingSegment::new("c", None),
        ]);

        assert_eq!(
            merged,
            vec![
                ThinkingSegment::new("ab", Some("s".to_string())),
                ThinkingSegment::new("c", None),
            ]
        );
    }

    #[test]
    fn scanner_handles_unsplit_stream() {
        let mut scanner = ThinkingScanner::new();
        let mut items = scanner.feed(r#"hi <thinking signature="s">deep</thinking> bye"#);
        items.extend(scanner.finish());

        assert_eq!(
            items,
            vec![
                ScanItem::Text("hi ".to_string()),
                ScanItem::Reasoning(ThinkingSegment::new("deep", Some("s".to_string()))),
                ScanItem::Text(" bye".to_string()),
            ]
        );
    }

    #[test]
    fn scanner_tolerates_tags_split_across_chunks() {
        let full = r#"pre<thinking signature="sig">reasoned</thinking>post"#;

        // Any byte-chunking must yield the same parse as the whole string.
        for split_a in [3, 7, 12, 25, 40] {
            for split_b in [split_a + 1, split_a + 5, full.len() - 2] {
                if split_b >= full.len() {
                    continue;
                }

                let mut scanner = ThinkingScanner::new();
                let mut items = Vec::new();
                items.extend(scanner.feed(&full[..split_a]));
                items.extend(scanner.feed(&full[split_a..split_b]));
                items.extend(scanner.feed(&full[split_b..]));
                items.extend(scanner.finish());

                let text: String = items
                    .iter()
                    .filter_map(|item| match item {
                        ScanItem::Text(t) => Some(t.as_str()),
                        _ => None,
                    })
                    .collect();
                let reasoning: Vec<_> = items
                    .iter()
                    .filter_map(|item| match item {
                        ScanItem::Reasoning(segment) => Some(segment.clone()),
                        _ => None,
                    })
                    .collect();

                assert_eq!(text, "prepost", "splits at {split_a}/{split_b}");
                assert_eq!(
                    reasoning,
                    vec![ThinkingSegment::new("reasoned", Some("sig".to_string()))],
                    "splits at {split_a}/{split_b}"
                );
            }
        }
    }

    #[test]
    fn scanner_treats_nested_opener_as_literal_reasoning_text() {
        let mut scanner = ThinkingScanner::new();
        let mut items = scanner.feed("<thinking>outer <thinking> still inner</thinking>");
        items.extend(scanner.finish());

        assert_eq!(
            items,
            vec![ScanItem::Reasoning(ThinkingSegment::new(
                "outer <thinking> still inner",
                None
            ))]
        );
    }

    #[test]
    fn scanner_flushes_unterminated_block_at_end() {
        let mut scanner = ThinkingScanner::new();
        let mut items = scanner.feed("<thinking>never closed");
        items.extend(scanner.finish());

        assert_eq!(
            items,
            vec![ScanItem::Reasoning(ThinkingSegment::new("never closed", None))]
        );
    }

    #[test]
    fn toggle_values_parse_case_insensitively() {
        for value in ["0", "false", "No", "OFF", " off "] {
            assert!(!parse_toggle(Some(value)), "{value}");
        }
        for value in ["1", "true", "yes", "on", "anything"] {
            assert!(parse_toggle(Some(value)), "{value}");
        }
        // Default is enabled.
        assert!(parse_toggle(None));
    }

    #[test]
    fn serialization_is_enabled_in_a_clean_environment() {
        temp_env::with_vars_unset(
            ["LLM__OPENAI_THINKING_XML", "OPENAI_STREAM_ENABLE_THINKING_SERIALIZATION"],
            || {
                assert!(thinking_xml_enabled());
            },
        );
    }
}
