//! Directive extraction from generator output.
//!
//! A directive block is a fenced block whose info string is `action:<kind>`:
//!
//! ````text
//! ```action:log_meal
//! {"name": "Skyr", "calories": 120}
//! ```
//! ````
//!
//! The marker and kind are matched case-insensitively. Blocks with an unknown
//! kind or a payload that is not a JSON object are logged and skipped; they are
//! never returned and never stripped from display text. A block whose body runs
//! into another directive opener is unclosed; scanning resumes at that opener.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::directive::{Directive, DirectiveKind};

static OPENER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[ \t]*(?i:action):[ \t]*([A-Za-z_]+)[ \t]*\r?\n").expect("directive opener pattern is valid")
});

const FENCE: &str = "```";

/// A fenced directive block before its payload is interpreted.
struct RawBlock<'a> {
    range: Range<usize>,
    kind_name: &'a str,
    body: &'a str,
}

/// Closed directive fences in document order.
fn raw_blocks(text: &str) -> Vec<RawBlock<'_>> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = OPENER_RE.captures(&text[cursor..]) {
        let Some(opener) = caps.get(0) else { break };
        let start = cursor + opener.start();
        let body_start = cursor + opener.end();
        let kind_name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let Some(offset) = text[body_start..].find(FENCE) else {
            debug!("Unclosed {} block at end of text", kind_name);
            break;
        };
        let fence = body_start + offset;

        if OPENER_RE.find(&text[fence..]).is_some_and(|m| m.start() == 0) {
            warn!("Skipping unclosed {} block", kind_name);
            cursor = fence;
            continue;
        }

        let end = fence + FENCE.len();
        blocks.push(RawBlock {
            range: start..end,
            kind_name,
            body: &text[body_start..fence],
        });
        cursor = end;
    }

    blocks
}

/// Stateless extractor for fenced directive blocks.
pub struct DirectiveExtractor;

impl DirectiveExtractor {
    /// First well-formed directive in document order.
    pub fn extract_first(text: &str) -> Option<Directive> {
        Self::well_formed_blocks(text).into_iter().next().map(|(_, d)| d)
    }

    /// All well-formed directives in document order.
    pub fn extract_all(text: &str) -> Vec<Directive> {
        Self::well_formed_blocks(text)
            .into_iter()
            .map(|(_, d)| d)
            .collect()
    }

    /// Whether the text contains at least one fence that looks like a directive,
    /// well-formed or not.
    pub fn contains_block(text: &str) -> bool {
        !raw_blocks(text).is_empty()
    }

    /// Remove the first well-formed block, keeping the surrounding prose.
    pub fn strip(text: &str) -> String {
        match Self::well_formed_blocks(text).into_iter().next() {
            Some((range, _)) => join_segments(&[&text[..range.start], &text[range.end..]]),
            None => text.to_string(),
        }
    }

    /// Remove every well-formed block, keeping the surrounding prose.
    pub fn strip_all(text: &str) -> String {
        let blocks = Self::well_formed_blocks(text);
        if blocks.is_empty() {
            return text.to_string();
        }

        let mut segments = Vec::with_capacity(blocks.len() + 1);
        let mut cursor = 0;
        for (range, _) in &blocks {
            segments.push(&text[cursor..range.start]);
            cursor = range.end;
        }
        segments.push(&text[cursor..]);

        join_segments(&segments)
    }

    fn well_formed_blocks(text: &str) -> Vec<(Range<usize>, Directive)> {
        let mut found = Vec::new();

        for block in raw_blocks(text) {
            let kind = match block.kind_name.parse::<DirectiveKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!("Skipping directive block with unknown type '{}'", block.kind_name);
                    continue;
                }
            };

            let payload = match serde_json::from_str::<Value>(block.body.trim()) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    warn!(
                        "Skipping {} directive: payload is a {} instead of an object",
                        kind,
                        json_type_name(&other)
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {} directive with malformed payload: {}", kind, e);
                    continue;
                }
            };

            debug!("Extracted {} directive ({} fields)", kind, payload.len());
            let raw = &text[block.range.clone()];
            found.push((block.range, Directive::new(kind, payload, raw)));
        }

        found
    }
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEAL_REPLY: &str = "Klingt lecker! Ich trage das ein:\n\n```action:log_meal\n{\"name\":\"500g Skyr mit 2 Orangen\",\"type\":\"snack\",\"calories\":430,\"protein\":52,\"carbs\":58,\"fat\":2}\n```\n\nGuten Appetit!";

    #[test]
    fn test_no_block_yields_none() {
        assert!(DirectiveExtractor::extract_first("Just some advice, no actions.").is_none());
        assert!(DirectiveExtractor::extract_all("```rust\nfn main() {}\n```").is_empty());
    }

    #[test]
    fn test_single_block() {
        let directive = DirectiveExtractor::extract_first(MEAL_REPLY).unwrap();
        assert_eq!(directive.kind, DirectiveKind::LogMeal);
        assert_eq!(directive.payload["calories"], 430);
        assert!(directive.raw.starts_with("```action:log_meal"));
        assert!(directive.raw.ends_with("```"));
    }

    #[test]
    fn test_marker_is_case_insensitive() {
        let text = "```ACTION:Log_Body\n{\"weight_kg\": 82.5}\n```";
        let directive = DirectiveExtractor::extract_first(text).unwrap();
        assert_eq!(directive.kind, DirectiveKind::LogBody);
    }

    #[test]
    fn test_multiple_blocks_in_document_order() {
        let text = "A\n```action:log_body\n{\"weight_kg\": 80}\n```\nB\n```action:log_meal\n{\"name\": \"Apfel\", \"calories\": 52}\n```\nC";
        let all = DirectiveExtractor::extract_all(text);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, DirectiveKind::LogBody);
        assert_eq!(all[1].kind, DirectiveKind::LogMeal);
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let text = "```action:log_meal\n{name: broken\n```\n```action:log_body\n{\"weight_kg\": 80}\n```";
        let all = DirectiveExtractor::extract_all(text);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, DirectiveKind::LogBody);
    }

    #[test]
    fn test_unclosed_block_does_not_swallow_next() {
        let text = "Erst:\n```action:log_meal\n{\"name\": \"Apfel\", \"calories\": 52\n\nDann:\n```action:log_body\n{\"weight_kg\": 80}\n```\nEnde";
        let all = DirectiveExtractor::extract_all(text);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, DirectiveKind::LogBody);
        assert_eq!(all[0].payload["weight_kg"], 80);
        assert!(all[0].raw.starts_with("```action:log_body"));

        let stripped = DirectiveExtractor::strip_all(text);
        assert!(stripped.contains("Apfel"));
        assert!(!stripped.contains("weight_kg"));
        assert!(stripped.ends_with("Ende"));
    }

    #[test]
    fn test_unclosed_trailing_block_is_ignored() {
        let text = "```action:log_body\n{\"weight_kg\": 80}\n```\n```action:log_meal\n{\"name\": \"Brot\"";
        let all = DirectiveExtractor::extract_all(text);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, DirectiveKind::LogBody);
    }

    #[test]
    fn test_unknown_and_non_object_are_skipped() {
        let text = "```action:launch_rocket\n{}\n```\n```action:log_meal\n[1, 2]\n```";
        assert!(DirectiveExtractor::extract_all(text).is_empty());
        assert!(DirectiveExtractor::contains_block(text));
    }

    #[test]
    fn test_strip_preserves_surrounding_prose() {
        let stripped = DirectiveExtractor::strip(MEAL_REPLY);
        assert_eq!(stripped, "Klingt lecker! Ich trage das ein:\n\nGuten Appetit!");
    }

    #[test]
    fn test_strip_only_removes_first_block() {
        let text = "A\n```action:log_body\n{\"weight_kg\": 80}\n```\nB\n```action:log_body\n{\"waist_cm\": 90}\n```";
        let stripped = DirectiveExtractor::strip(text);
        assert!(stripped.starts_with("A\n\nB"));
        assert!(stripped.contains("waist_cm"));

        let all_stripped = DirectiveExtractor::strip_all(text);
        assert_eq!(all_stripped, "A\n\nB");
    }

    #[test]
    fn test_strip_leaves_malformed_untouched() {
        let text = "Intro\n```action:log_meal\nnot json\n```\nOutro";
        assert_eq!(DirectiveExtractor::strip(text), text);
        assert_eq!(DirectiveExtractor::strip_all(text), text);
    }
}
