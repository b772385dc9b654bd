//! Statement classification.
//!
//! [`classify`] decides which [`ItemKind`] a recognized text is, and
//! [`statement`] splits an already classified item into the parts the
//! engine resolves.

use crate::eval::{self, is_identifier};
use crate::types::{ItemKind, RecognizedItem};

/// Hint labels (substrings, case-insensitive) that mark a diagram problem.
const GRAPHICAL_HINTS: &[&str] = &["graph", "geometr", "diagram", "abstract", "drawing"];

/// A classified item split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Text to evaluate.
    Expression(String),
    /// `name = value`.
    Assignment { name: String, value: String },
    /// `lhs = rhs` in one or more unknowns.
    Equation { lhs: String, rhs: String },
    /// Diagram problem; the text is kept as a description.
    Graphical(String),
}

/// Trim whitespace and inline-math `$` delimiters.
pub fn normalize(raw: &str) -> String {
    raw.trim().trim_matches('$').trim().to_string()
}

/// `2 + 3 =` and `2 + 3 = ?` become `2 + 3`. Returns `None` when there is no
/// dangling `=`.
fn strip_dangling(text: &str) -> Option<&str> {
    let rest = text.trim_end();
    let rest = rest.strip_suffix('?').map(str::trim_end).unwrap_or(rest);
    let rest = rest.strip_suffix('=')?;
    if rest.ends_with(['=', '<', '>', '!']) {
        return None;
    }
    Some(rest.trim_end())
}

/// Byte offsets of `=` signs outside brackets that are not part of
/// `==`, `<=`, `>=` or `!=`.
fn top_level_equals(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut depth: i32 = 0;
    let mut found = Vec::new();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'=' if depth == 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                let compound = matches!(prev, b'=' | b'<' | b'>') || next == b'=';
                // `5!=120` reads as a factorial on paper, so `!` does not block.
                if !compound {
                    found.push(i);
                }
            }
            _ => {}
        }
    }
    found
}

/// Split at a single top-level `=` with non-empty sides.
fn split_equation(text: &str) -> Option<(&str, &str)> {
    let positions = top_level_equals(text);
    if positions.len() != 1 {
        return None;
    }
    let (lhs, rhs) = text.split_at(positions[0]);
    let (lhs, rhs) = (lhs.trim(), rhs[1..].trim());
    if lhs.is_empty() || rhs.is_empty() {
        return None;
    }
    Some((lhs, rhs))
}

/// Whether `name` occurs as a symbol in `text`.
fn references(text: &str, name: &str) -> bool {
    match eval::parse(text) {
        Ok(expr) => eval::free_symbols(&expr).contains(name),
        Err(_) => text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .any(|word| word == name),
    }
}

fn is_graphical_hint(hint: &str) -> bool {
    let hint = hint.to_lowercase();
    GRAPHICAL_HINTS.iter().any(|h| hint.contains(h))
}

/// Classify recognized text.
///
/// Rules, first match wins:
///
/// 1. trailing `=` or `= ?` → expression
/// 2. `name = value` with `name` absent from `value` → assignment
/// 3. any other single top-level `=` → equation
/// 4. a graphical/geometry/diagram/abstract hint → graphical
/// 5. a bare identifier the recognizer answered and flagged as assigned → assignment
/// 6. otherwise → expression
pub fn classify(
    raw: &str,
    hint: Option<&str>,
    has_reported_result: bool,
    reported_assign: bool,
) -> ItemKind {
    let text = normalize(raw);

    if strip_dangling(&text).is_some() {
        return ItemKind::Expression;
    }

    if let Some((lhs, rhs)) = split_equation(&text) {
        if is_identifier(lhs) && !references(rhs, lhs) {
            return ItemKind::Assignment;
        }
        return ItemKind::Equation;
    }

    if hint.is_some_and(is_graphical_hint) {
        return ItemKind::Graphical;
    }

    if reported_assign && has_reported_result && is_identifier(&text) {
        return ItemKind::Assignment;
    }

    ItemKind::Expression
}

/// Split a classified item into its parts.
pub fn statement(item: &RecognizedItem) -> Statement {
    let text = normalize(&item.raw_expression);

    match item.kind {
        ItemKind::Expression => {
            let body = strip_dangling(&text).unwrap_or(&text);
            Statement::Expression(body.to_string())
        }
        ItemKind::Assignment => match split_equation(&text) {
            Some((name, value)) => Statement::Assignment {
                name: name.to_string(),
                value: value.to_string(),
            },
            None => match &item.reported_result {
                Some(reported) => Statement::Assignment {
                    name: text,
                    value: reported.to_string(),
                },
                None => Statement::Expression(text),
            },
        },
        ItemKind::Equation => match split_equation(&text) {
            Some((lhs, rhs)) => Statement::Equation {
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            },
            None => Statement::Expression(text),
        },
        ItemKind::Graphical => Statement::Graphical(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MathValue;

    fn kind(text: &str) -> ItemKind {
        classify(text, None, false, false)
    }

    #[test]
    fn plain_arithmetic_is_an_expression() {
        assert_eq!(kind("2 + 3 * 4"), ItemKind::Expression);
        assert_eq!(kind("  $x^2$ "), ItemKind::Expression);
    }

    #[test]
    fn dangling_equals_is_an_expression() {
        assert_eq!(kind("2 + 2 ="), ItemKind::Expression);
        assert_eq!(kind("2 + 2 = ?"), ItemKind::Expression);
        assert_eq!(kind("2 + 2 =?"), ItemKind::Expression);
    }

    #[test]
    fn identifier_binding_is_an_assignment() {
        assert_eq!(kind("x = 5"), ItemKind::Assignment);
        assert_eq!(kind("total = a + b"), ItemKind::Assignment);
    }

    #[test]
    fn self_reference_or_complex_lhs_is_an_equation() {
        assert_eq!(kind("x = x + 1"), ItemKind::Equation);
        assert_eq!(kind("2x + 3 = 7"), ItemKind::Equation);
        assert_eq!(kind("2 + 3 = 5"), ItemKind::Equation);
    }

    #[test]
    fn comparisons_are_not_equations() {
        assert_eq!(kind("x <= 4"), ItemKind::Expression);
        assert_eq!(kind("a == b"), ItemKind::Expression);
        assert_eq!(kind("f(x=1) + 2"), ItemKind::Expression);
    }

    #[test]
    fn graphical_hint() {
        assert_eq!(
            classify("triangle area", Some("Geometry"), true, false),
            ItemKind::Graphical
        );
        assert_eq!(
            classify("collision", Some("abstract concept"), true, false),
            ItemKind::Graphical
        );
        // Text rules take precedence over hints.
        assert_eq!(classify("x = 3", Some("graphical"), true, true), ItemKind::Assignment);
    }

    #[test]
    fn reported_assignment_of_bare_identifier() {
        assert_eq!(classify("y", None, true, true), ItemKind::Assignment);
        assert_eq!(classify("y", None, false, true), ItemKind::Expression);
        assert_eq!(classify("y + 1", None, true, true), ItemKind::Expression);
    }

    #[test]
    fn statements_split_by_kind() {
        assert_eq!(
            statement(&RecognizedItem::text("x = 2 + 3")),
            Statement::Assignment {
                name: "x".into(),
                value: "2 + 3".into()
            }
        );
        assert_eq!(
            statement(&RecognizedItem::text("2x + 3 = 7")),
            Statement::Equation {
                lhs: "2x + 3".into(),
                rhs: "7".into()
            }
        );
        assert_eq!(
            statement(&RecognizedItem::text("4 * 5 = ?")),
            Statement::Expression("4 * 5".into())
        );
    }

    #[test]
    fn bare_identifier_assignment_takes_reported_value() {
        let item = RecognizedItem::new("y", None, Some(MathValue::Number(7.0)), true);
        assert_eq!(item.kind, ItemKind::Assignment);
        assert_eq!(
            statement(&item),
            Statement::Assignment {
                name: "y".into(),
                value: "7".into()
            }
        );
    }
}
