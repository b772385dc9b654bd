//! JSON extraction from LLM responses.
//!
//! [`parse_json_traced`] runs a multi-strategy pipeline that handles think
//! blocks, markdown fences, surrounding prose and malformed JSON, and reports
//! which strategy succeeded. [`parse_json_value`] returns just the value.

use serde_json::Value;

use crate::output_parser::error::{truncate, ParseError};
use crate::output_parser::extract::{code_blocks, find_bracketed, offset_in, preprocess};
use crate::output_parser::repair::try_repair_json;

/// A parsed reply plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJson {
    pub value: Value,
    /// `"direct"`, `"code_block"` or `"bracket"`.
    pub strategy: &'static str,
    /// Whether [`try_repair_json`] had to fix the candidate.
    pub repaired: bool,
}

/// Parse an LLM response into a JSON value.
///
/// Strategies (in order):
/// 1. Direct parse of the preprocessed text
/// 2. Contents of a markdown code block (`` ```json `` first)
/// 3. The outermost bracket-matched object or array
/// 4. Repair of each of the above candidates
///
/// # Examples
///
/// ```
/// use inkcalc::output_parser::parse_json_traced;
///
/// let reply = "<think>two items</think>Sure!\n```json\n{\"items\": []}\n```";
/// let parsed = parse_json_traced(reply).unwrap();
/// assert_eq!(parsed.strategy, "code_block");
/// assert!(parsed.value["items"].is_array());
/// ```
pub fn parse_json_traced(response: &str) -> Result<ParsedJson, ParseError> {
    let cleaned = preprocess(response);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let candidates = candidates(&cleaned);

    for &(strategy, text) in &candidates {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return Ok(ParsedJson {
                value,
                strategy,
                repaired: false,
            });
        }
    }

    for &(strategy, text) in &candidates {
        if let Some(fixed) = try_repair_json(text) {
            if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
                return Ok(ParsedJson {
                    value,
                    strategy,
                    repaired: true,
                });
            }
        }
    }

    Err(ParseError::Unparseable {
        expected_format: "JSON",
        text: truncate(&cleaned, 200),
    })
}

/// Parse into a `serde_json::Value`. See [`parse_json_traced`].
pub fn parse_json_value(response: &str) -> Result<Value, ParseError> {
    parse_json_traced(response).map(|parsed| parsed.value)
}

/// Candidate substrings, most specific first.
fn candidates(cleaned: &str) -> Vec<(&'static str, &str)> {
    let mut out = vec![("direct", cleaned)];

    let blocks = code_blocks(cleaned);
    let fenced = blocks
        .iter()
        .find(|b| b.lang.is_some_and(|l| l.eq_ignore_ascii_case("json")))
        .or_else(|| blocks.iter().find(|b| b.body.starts_with(['{', '['])));
    if let Some(block) = fenced {
        out.push(("code_block", block.body));
    }

    if let Some(region) = outermost_region(cleaned) {
        out.push(("bracket", region));
    }

    out
}

/// The later of the last object and last array, unless one encloses the
/// other, in which case the enclosing one wins. An array of item objects is
/// therefore kept whole instead of yielding its last element.
fn outermost_region(text: &str) -> Option<&str> {
    let object = find_bracketed(text, '{', '}');
    let array = find_bracketed(text, '[', ']');

    match (object, array) {
        (Some(o), Some(a)) => {
            let (os, as_) = (offset_in(text, o)?, offset_in(text, a)?);
            let (oe, ae) = (os + o.len(), as_ + a.len());
            if as_ <= os && oe <= ae {
                Some(a)
            } else if os <= as_ && ae <= oe {
                Some(o)
            } else if as_ > os {
                Some(a)
            } else {
                Some(o)
            }
        }
        (o, a) => o.or(a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_object() {
        let parsed = parse_json_traced(r#"{"items": [{"expr": "1 + 1"}]}"#).unwrap();
        assert_eq!(parsed.strategy, "direct");
        assert!(!parsed.repaired);
        assert_eq!(parsed.value["items"][0]["expr"], "1 + 1");
    }

    #[test]
    fn think_then_json() {
        let v = parse_json_value(r#"<think>reading digits</think>[{"expr": "2"}]"#).unwrap();
        assert_eq!(v, json!([{"expr": "2"}]));
    }

    #[test]
    fn bare_code_block() {
        let parsed = parse_json_traced("```\n[{\"expr\": \"4\"}]\n```").unwrap();
        assert_eq!(parsed.strategy, "code_block");
    }

    #[test]
    fn array_of_objects_in_prose_is_kept_whole() {
        let input = r#"I found: [{"expr": "1 + 2", "result": 3}, {"expr": "x = 4", "result": 4}] in the image."#;
        let parsed = parse_json_traced(input).unwrap();
        assert_eq!(parsed.strategy, "bracket");
        assert_eq!(parsed.value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn object_wrapping_array_in_prose() {
        let input = r#"Result: {"items": [{"expr": "5"}]} hope it helps"#;
        let v = parse_json_value(input).unwrap();
        assert_eq!(v["items"][0]["expr"], "5");
    }

    #[test]
    fn python_literal_reply_is_repaired() {
        let input = "Here you go: [{'expr': 'y', 'result': 10, 'assign': True}]";
        let parsed = parse_json_traced(input).unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value[0]["assign"], true);
    }

    #[test]
    fn truncated_reply_is_completed() {
        let v = parse_json_value(r#"{"items": [{"expr": "2 + 2", "result": 4}, {"expr": "#).unwrap();
        assert_eq!(v["items"][0]["result"], 4);
    }

    #[test]
    fn empty_and_reasoning_only_fail() {
        assert!(matches!(parse_json_value("   "), Err(ParseError::EmptyResponse)));
        assert!(matches!(
            parse_json_value("<think>never answered"),
            Err(ParseError::EmptyResponse)
        ));
    }

    #[test]
    fn prose_only_is_unparseable() {
        assert!(matches!(
            parse_json_value("I cannot see any math in this image."),
            Err(ParseError::Unparseable { .. })
        ));
    }
}
