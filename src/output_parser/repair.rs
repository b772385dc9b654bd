//! Deterministic JSON repair for common LLM output errors.
//!
//! Vision models asked for JSON frequently answer with Python literals
//! instead (`{'expr': '2 + 2', 'result': 4, 'assign': False}`), or stop
//! mid-object when they hit the token limit. [`try_repair_json`] rewrites
//! such text in a single pass over the characters and validates the result
//! with `serde_json`. No regex is used.

use serde_json::Value;

/// Attempt to repair common LLM JSON mistakes without calling the model again.
///
/// Returns the repaired string if the result is valid JSON. Returns `None` if
/// the input was already valid or could not be repaired.
///
/// Fixes applied:
/// - single-quoted strings become double-quoted
/// - Python `True`/`False`/`None` (and `nan`/`inf`) become JSON literals
/// - `//`, `/* */` and `#` comments are dropped
/// - trailing commas before `}`/`]` are dropped
/// - unquoted object keys are quoted
/// - raw newlines and tabs inside strings are escaped
/// - truncated output is closed: open strings, dangling keys, missing brackets
///
/// # Examples
///
/// ```
/// use inkcalc::output_parser::try_repair_json;
///
/// let fixed = try_repair_json("[{'expr': 'x', 'result': 5, 'assign': True}]").unwrap();
/// assert_eq!(fixed, r#"[{"expr": "x", "result": 5, "assign": true}]"#);
/// ```
pub fn try_repair_json(broken: &str) -> Option<String> {
    if serde_json::from_str::<Value>(broken).is_ok() {
        return None;
    }

    let repaired = Repairer::new(broken).run();
    serde_json::from_str::<Value>(&repaired)
        .is_ok()
        .then_some(repaired)
}

struct Repairer {
    chars: Vec<char>,
    pos: usize,
    out: String,
    /// Expected closing delimiters for the currently open containers.
    stack: Vec<char>,
}

impl Repairer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            out: String::with_capacity(input.len() + 8),
            stack: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn emit(&mut self, c: char) {
        self.out.push(c);
        self.pos += 1;
    }

    fn run(mut self) -> String {
        while let Some(c) = self.peek() {
            match c {
                '"' | '\'' => self.string(c),
                '/' if self.peek_at(1) == Some('/') => self.skip_line(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                '#' => self.skip_line(),
                ',' => {
                    self.pos += 1;
                    if !self.closer_follows() {
                        self.out.push(',');
                    }
                }
                '{' => {
                    self.stack.push('}');
                    self.emit(c);
                }
                '[' => {
                    self.stack.push(']');
                    self.emit(c);
                }
                '}' | ']' => {
                    if self.stack.last() == Some(&c) {
                        self.stack.pop();
                    }
                    self.emit(c);
                }
                c if c.is_alphabetic() || c == '_' => self.word(),
                _ => self.emit(c),
            }
        }
        self.finish()
    }

    /// Copy a string literal delimited by `quote` as a JSON string.
    fn string(&mut self, quote: char) {
        self.pos += 1;
        self.out.push('"');

        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => match self.peek() {
                    // `\'` is not a JSON escape.
                    Some('\'') => {
                        self.out.push('\'');
                        self.pos += 1;
                    }
                    Some(next) => {
                        self.out.push('\\');
                        self.out.push(next);
                        self.pos += 1;
                    }
                    None => {}
                },
                c if c == quote => {
                    self.out.push('"');
                    return;
                }
                '"' => self.out.push_str("\\\""),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                c => self.out.push(c),
            }
        }

        // Unterminated: the input was cut off mid-string.
        self.out.push('"');
    }

    fn word(&mut self) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        let mut ahead = self.pos;
        while self.chars.get(ahead).is_some_and(|c| c.is_whitespace()) {
            ahead += 1;
        }
        let is_key = self.chars.get(ahead) == Some(&':') && self.stack.last() == Some(&'}');

        if is_key {
            self.out.push('"');
            self.out.push_str(&word);
            self.out.push('"');
            return;
        }

        let literal = match word.as_str() {
            "True" => "true",
            "False" => "false",
            "None" | "nan" | "NaN" | "inf" | "Infinity" => "null",
            other => other,
        };
        self.out.push_str(literal);
    }

    fn skip_line(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    /// Whether only whitespace separates the cursor from a closer or the end.
    fn closer_follows(&self) -> bool {
        let mut i = self.pos;
        while self.chars.get(i).is_some_and(|c| c.is_whitespace()) {
            i += 1;
        }
        matches!(self.chars.get(i), None | Some('}') | Some(']'))
    }

    /// Drop a dangling tail left by truncation, then close open containers.
    fn finish(mut self) -> String {
        loop {
            let len = self.out.trim_end().len();
            self.out.truncate(len);

            if self.out.ends_with(',') {
                self.out.pop();
                continue;
            }
            if self.out.ends_with(':') {
                self.out.pop();
                let len = self.out.trim_end().len();
                self.out.truncate(len);
                self.drop_trailing_string();
                continue;
            }
            if self.stack.last() == Some(&'}') && self.ends_with_orphan_key() {
                self.drop_trailing_string();
                continue;
            }
            break;
        }

        while let Some(closer) = self.stack.pop() {
            self.out.push(closer);
        }
        self.out
    }

    /// A string directly after `{` or `,` inside an object is a key with no value.
    fn ends_with_orphan_key(&self) -> bool {
        if !self.out.ends_with('"') {
            return false;
        }
        match last_string_start(&self.out) {
            Some(start) => matches!(self.out[..start].trim_end().chars().last(), Some(',' | '{')),
            None => false,
        }
    }

    fn drop_trailing_string(&mut self) {
        if self.out.ends_with('"') {
            if let Some(start) = last_string_start(&self.out) {
                self.out.truncate(start);
            }
        }
    }
}

/// Byte offset of the opening quote of the string that ends `s`.
fn last_string_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let last = bytes.len().checked_sub(1)?;
    (0..last)
        .rev()
        .find(|&i| bytes[i] == b'"' && (i == 0 || bytes[i - 1] != b'\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repaired(input: &str) -> Value {
        let fixed = try_repair_json(input).unwrap_or_else(|| panic!("could not repair {}", input));
        serde_json::from_str(&fixed).unwrap()
    }

    #[test]
    fn python_dict_list() {
        let v = repaired("[{'expr': '2 + 2', 'result': 4}, {'expr': 'x', 'result': 5, 'assign': True}]");
        assert_eq!(v[0]["expr"], "2 + 2");
        assert_eq!(v[1]["assign"], true);
    }

    #[test]
    fn python_none_and_false() {
        let v = repaired("{'result': None, 'assign': False}");
        assert!(v["result"].is_null());
        assert_eq!(v["assign"], false);
    }

    #[test]
    fn literals_inside_strings_are_untouched() {
        let v = repaired("{'expr': 'None of x', 'note': True}");
        assert_eq!(v["expr"], "None of x");
    }

    #[test]
    fn double_quotes_inside_single_quoted_string() {
        let v = repaired(r#"{'expr': 'say "hi"'}"#);
        assert_eq!(v["expr"], r#"say "hi""#);
    }

    #[test]
    fn escaped_apostrophe() {
        let v = repaired(r"{'expr': 'x\'s value'}");
        assert_eq!(v["expr"], "x's value");
    }

    #[test]
    fn trailing_commas() {
        let v = repaired(r#"{"items": [1, 2,], "b": 3,}"#);
        assert_eq!(v["items"].as_array().unwrap().len(), 2);
        assert_eq!(v["b"], 3);
    }

    #[test]
    fn comments() {
        let v = repaired("{\"a\": /* note */ 1, // trailing\n \"b\": 2} # done");
        assert_eq!(v["a"], 1);
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn unquoted_keys() {
        let v = repaired(r#"{expr: "y", result: 10}"#);
        assert_eq!(v["expr"], "y");
        assert_eq!(v["result"], 10);
    }

    #[test]
    fn raw_newline_in_string() {
        let v = repaired("{\"expr\": \"line one\nline two\"");
        assert_eq!(v["expr"], "line one\nline two");
    }

    #[test]
    fn truncated_mid_string() {
        let v = repaired(r#"{"items": [{"expr": "2 + 2", "result": 4}, {"expr": "3 *"#);
        assert_eq!(v["items"][1]["expr"], "3 *");
    }

    #[test]
    fn truncated_after_key() {
        let v = repaired(r#"{"items": [{"expr": "x", "result":"#);
        assert_eq!(v["items"][0]["expr"], "x");
        assert!(v["items"][0].get("result").is_none());
    }

    #[test]
    fn truncated_orphan_key() {
        let v = repaired(r#"{"expr": "x", "resu"#);
        assert_eq!(v, serde_json::json!({"expr": "x"}));
    }

    #[test]
    fn exponent_numbers_survive() {
        let v = repaired("{'result': 1e5,}");
        assert_eq!(v["result"], 100000.0);
    }

    #[test]
    fn no_repair_needed() {
        assert!(try_repair_json(r#"{"a": 1}"#).is_none());
        assert!(try_repair_json(r#"{"text": "don't stop"}"#).is_none());
    }

    #[test]
    fn unrepairable() {
        assert!(try_repair_json("not json at all").is_none());
    }
}
