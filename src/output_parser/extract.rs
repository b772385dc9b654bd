//! Extraction helpers shared by the reply parser.
//!
//! Vision models wrap their answer in reasoning blocks, markdown fences and
//! prose. These helpers peel that away so the JSON parser sees candidates.

/// Reasoning blocks some models emit before answering.
const REASONING_TAGS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<reasoning>", "</reasoning>"),
];

/// Strip reasoning blocks, then trim.
pub fn preprocess(text: &str) -> String {
    strip_think_tags(text).trim().to_string()
}

/// Strip all `<think>`, `<thinking>` and `<reasoning>` blocks from text.
///
/// An unclosed block swallows the rest of the text.
///
/// # Examples
///
/// ```
/// use inkcalc::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>2 + 2 is 4</think>[]"), "[]");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let mut result = text.to_string();
    for &(open, close) in REASONING_TAGS {
        while let Some(start) = result.find(open) {
            match result[start..].find(close) {
                Some(offset) => {
                    result.replace_range(start..start + offset + close.len(), "");
                }
                None => {
                    result.truncate(start);
                    break;
                }
            }
        }
    }
    result
}

/// A fenced markdown block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlock<'a> {
    /// Language hint after the opening fence, if any.
    pub lang: Option<&'a str>,
    /// Trimmed block body.
    pub body: &'a str,
}

/// All closed code fences in `text`, in order.
///
/// # Examples
///
/// ```
/// use inkcalc::output_parser::extract::code_blocks;
///
/// let blocks = code_blocks("Here:\n```json\n{\"items\": []}\n```");
/// assert_eq!(blocks[0].lang, Some("json"));
/// assert_eq!(blocks[0].body, "{\"items\": []}");
/// ```
pub fn code_blocks(text: &str) -> Vec<CodeBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(fence) = rest.find("```") {
        let after = &rest[fence + 3..];
        let Some(line_end) = after.find('\n') else {
            break;
        };
        let hint = after[..line_end].trim();
        let content = &after[line_end + 1..];
        let Some(close) = content.find("```") else {
            break;
        };
        blocks.push(CodeBlock {
            lang: (!hint.is_empty()).then_some(hint),
            body: content[..close].trim(),
        });
        rest = &content[close + 3..];
    }

    blocks
}

/// Byte offset just past the delimiter that balances the `open` at `start`.
/// Ignores delimiters inside double-quoted strings.
fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the last complete top-level `open`…`close` region in `text`.
///
/// Later regions win, since models tend to answer after thinking aloud.
///
/// # Examples
///
/// ```
/// use inkcalc::output_parser::extract::find_bracketed;
///
/// let input = r#"Result: {"items": [1, 2]}"#;
/// assert_eq!(find_bracketed(input, '{', '}'), Some(r#"{"items": [1, 2]}"#));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut best = None;
    let mut from = 0;

    while let Some(offset) = text[from..].find(open) {
        let start = from + offset;
        let Some(end) = balanced_end(text, start, open, close) else {
            break;
        };
        best = Some(&text[start..end]);
        from = end;
    }

    best
}

/// Position of `inner` inside `outer`, when `inner` is a subslice of it.
pub(crate) fn offset_in(outer: &str, inner: &str) -> Option<usize> {
    let start = (inner.as_ptr() as usize).checked_sub(outer.as_ptr() as usize)?;
    (start + inner.len() <= outer.len()).then_some(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_think_tags_complete() {
        assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
        assert_eq!(strip_think_tags("<thinking>hm</thinking>result"), "result");
        assert_eq!(strip_think_tags("<reasoning>hm</reasoning>result"), "result");
    }

    #[test]
    fn strip_think_tags_multiple_and_mixed() {
        let input = "<think>a</think>mid<thinking>b</thinking>end<think>c</think>";
        assert_eq!(strip_think_tags(input), "midend");
    }

    #[test]
    fn strip_think_tags_unclosed() {
        assert_eq!(strip_think_tags("answer <think>still going"), "answer ");
    }

    #[test]
    fn preprocess_strips_and_trims() {
        assert_eq!(preprocess("  <think>stuff</think>  [1]  "), "[1]");
    }

    #[test]
    fn code_blocks_with_and_without_hint() {
        let input = "a\n```json\n[1]\n```\nb\n```\n{\"x\": 1}\n```";
        let blocks = code_blocks(input);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], CodeBlock { lang: Some("json"), body: "[1]" });
        assert_eq!(blocks[1], CodeBlock { lang: None, body: "{\"x\": 1}" });
    }

    #[test]
    fn code_blocks_ignores_unclosed_fence() {
        assert!(code_blocks("```json\n[1, 2").is_empty());
        assert!(code_blocks("no fences").is_empty());
    }

    #[test]
    fn find_bracketed_nested_and_strings() {
        let input = r#"{"expr": "f(x) = [x]", "nested": {"a": 1}}"#;
        assert_eq!(find_bracketed(input, '{', '}'), Some(input));
    }

    #[test]
    fn find_bracketed_prefers_later() {
        let input = r#"[1, 2] and then ["a", "b"]"#;
        assert_eq!(find_bracketed(input, '[', ']'), Some(r#"["a", "b"]"#));
    }

    #[test]
    fn find_bracketed_unbalanced() {
        assert_eq!(find_bracketed("{\"a\": 1", '{', '}'), None);
        assert_eq!(find_bracketed("{} then {\"a\": 1", '{', '}'), Some("{}"));
        assert_eq!(find_bracketed("no brackets", '{', '}'), None);
    }

    #[test]
    fn offset_of_subslice() {
        let outer = "abc[1]def";
        let inner = find_bracketed(outer, '[', ']').unwrap();
        assert_eq!(offset_in(outer, inner), Some(3));
    }
}
