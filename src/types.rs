//! Request, item and result types shared by the pipeline stages.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A computed value: a number, or a symbolic/descriptive form.
///
/// Serializes as a JSON number (integral values without a fraction) or a
/// string. On input, strings that parse as finite numbers become
/// [`MathValue::Number`]; any other JSON (`null`, booleans, lists) is kept as
/// its compact JSON text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawMathValue")]
pub enum MathValue {
    Number(f64),
    Symbolic(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMathValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl From<RawMathValue> for MathValue {
    fn from(raw: RawMathValue) -> Self {
        match raw {
            RawMathValue::Number(n) => MathValue::number(n),
            RawMathValue::Text(s) => MathValue::from_text(&s),
            RawMathValue::Other(value) => MathValue::Symbolic(value.to_string()),
        }
    }
}

impl MathValue {
    /// Build a numeric value, rounding away binary float noise
    /// (`0.1 + 0.2` becomes `0.3`).
    pub fn number(n: f64) -> Self {
        MathValue::Number(round_decimals(n))
    }

    /// Interpret text: numeric strings become numbers, everything else is kept
    /// verbatim (trimmed) as a symbolic value.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => MathValue::number(n),
            _ => MathValue::Symbolic(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MathValue::Number(n) => Some(*n),
            MathValue::Symbolic(_) => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, MathValue::Number(_))
    }
}

impl Serialize for MathValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MathValue::Number(n) if is_exact_integer(*n) => serializer.serialize_i64(*n as i64),
            MathValue::Number(n) => serializer.serialize_f64(*n),
            MathValue::Symbolic(s) => serializer.serialize_str(s),
        }
    }
}

impl fmt::Display for MathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MathValue::Number(n) => f.write_str(&format_number(*n)),
            MathValue::Symbolic(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MathValue {
    fn from(n: f64) -> Self {
        MathValue::number(n)
    }
}

impl From<i64> for MathValue {
    fn from(n: i64) -> Self {
        MathValue::Number(n as f64)
    }
}

impl From<&str> for MathValue {
    fn from(s: &str) -> Self {
        MathValue::from_text(s)
    }
}

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

fn is_exact_integer(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER
}

/// Round to 10 decimal places. Values too large for that to matter pass through.
pub(crate) fn round_decimals(n: f64) -> f64 {
    if !n.is_finite() || n.abs() >= 1e15 {
        return n;
    }
    let rounded = (n * 1e10).round() / 1e10;
    // Avoid "-0".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Human-readable number: integers without a fraction, otherwise the
/// shortest representation after rounding.
pub fn format_number(n: f64) -> String {
    let n = round_decimals(n);
    if is_exact_integer(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Working set of named values visible to evaluation.
///
/// Keys are case-sensitive. Iteration order is by name, which keeps prompts
/// rendered from the mapping deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableMapping(BTreeMap<String, MathValue>);

impl VariableMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MathValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Bind `name`, returning the previous value if there was one.
    pub fn bind(&mut self, name: impl Into<String>, value: MathValue) -> Option<MathValue> {
        self.0.insert(name.into(), value)
    }

    /// Builder-style [`bind`](Self::bind).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<MathValue>) -> Self {
        self.bind(name, value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MathValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, MathValue)> for VariableMapping {
    fn from_iter<I: IntoIterator<Item = (String, MathValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The kind of mathematical statement a recognized item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Self-contained arithmetic/algebraic statement evaluated to a value.
    Expression,
    /// `name = value-expression`; updates the variable mapping.
    Assignment,
    /// An equation in unknowns, solved for them where possible.
    Equation,
    /// A diagram-based problem answered on a best-effort basis.
    Graphical,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemKind::Expression => "expression",
            ItemKind::Assignment => "assignment",
            ItemKind::Equation => "equation",
            ItemKind::Graphical => "graphical",
        };
        f.write_str(s)
    }
}

/// One mathematical statement found in the image.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedItem {
    /// Textual form as recognized. Never empty.
    pub raw_expression: String,
    /// Classification, see [`classify`](crate::classify::classify).
    pub kind: ItemKind,
    /// The recognizer's own answer, used when local evaluation is not possible.
    pub reported_result: Option<MathValue>,
    /// Whether the recognizer flagged the item as binding a variable.
    pub reported_assign: bool,
}

impl RecognizedItem {
    /// Build an item and classify it. `hint` is the recognizer's kind label,
    /// if it gave one.
    pub fn new(
        raw_expression: impl Into<String>,
        hint: Option<&str>,
        reported_result: Option<MathValue>,
        reported_assign: bool,
    ) -> Self {
        let raw_expression = raw_expression.into();
        let kind = crate::classify::classify(
            &raw_expression,
            hint,
            reported_result.is_some(),
            reported_assign,
        );
        Self {
            raw_expression,
            kind,
            reported_result,
            reported_assign,
        }
    }

    /// Shorthand for an item with no hint and no reported answer.
    pub fn text(raw_expression: impl Into<String>) -> Self {
        Self::new(raw_expression, None, None, false)
    }
}

/// One resolved output, in recognition order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Normalized input text; for assignments, the bound variable name.
    pub expression: String,
    /// Computed value.
    pub result: MathValue,
    /// Whether this record updated the variable mapping.
    pub assign: bool,
    /// Classification of the source item.
    pub kind: ItemKind,
}

/// Body of `POST /api/calculate-results`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRequest {
    /// Data-URL encoded image.
    pub image: String,
    /// Pre-assigned variables.
    #[serde(default)]
    pub dict_of_vars: VariableMapping,
}
