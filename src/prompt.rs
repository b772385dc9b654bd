//! Prompt rendering for the recognition backend.

use crate::types::VariableMapping;

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// System prompt for every recognition call.
pub const SYSTEM_PROMPT: &str = "You read handwritten mathematics from images. \
You answer with JSON only, never with prose.";

const ANALYSIS_TEMPLATE: &str = "Look at the image and find every mathematical statement written in it, \
in reading order (top to bottom, left to right).

{rules}

{variables}

{format}";

const RULES: &[&str] = &[
    "A plain expression such as `2 + 3 * 4` or `5 * 6 =`: give the expression and its value. Use PEMDAS.",
    "An assignment such as `x = 5` or `y = 2 + 3`: give it as written, with kind \"assignment\", the assigned value as result, and assign true.",
    "An equation in unknowns such as `2x + 3 = 7`: give it as written, with kind \"equation\" and the value of the unknown as result.",
    "A drawn problem (geometry, physics diagram, graph) or an abstract concept: describe it in expr, use kind \"graphical\", and give the answer or the concept as result.",
    "Write expressions with ASCII operators: + - * / ^ and parentheses.",
    "If the image contains no mathematics, return an empty items list.",
];

const FORMAT: &str = "Reply with a single JSON object and nothing else:
{{\"items\": [{{\"expr\": \"2 + 2\", \"kind\": \"expression\", \"result\": 4, \"assign\": false}}]}}";

/// Build a prompt string with variable substitution.
///
/// Replaces `{key}` placeholders with the paired values. Use `{{` to insert a
/// literal `{` and `}}` to insert a literal `}`.
///
/// # Example
///
/// ```
/// use inkcalc::prompt::render;
///
/// let result = render("Solve {expr}, reply {{\"result\": n}}", &[("expr", "2x = 4")]);
/// assert_eq!(result, r#"Solve 2x = 4, reply {"result": n}"#);
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    // Pass 1: protect escaped braces
    let mut rendered = template.replace("{{", ESCAPE_SENTINEL);
    rendered = rendered.replace("}}", ESCAPE_SENTINEL_CLOSE);

    // Pass 2: substitute placeholders
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    // Pass 3: restore escaped braces
    rendered = rendered.replace(ESCAPE_SENTINEL, "{");
    rendered.replace(ESCAPE_SENTINEL_CLOSE, "}")
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[&str]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

/// The user prompt for one image, listing the known variables as JSON.
pub fn analysis_prompt(variables: &VariableMapping) -> String {
    let known = if variables.is_empty() {
        "None.".to_string()
    } else {
        let listing = serde_json::to_string(variables).unwrap_or_else(|_| "{}".into());
        format!(
            "{}\nWhen one of these names appears, use its value.",
            listing
        )
    };

    render(
        ANALYSIS_TEMPLATE,
        &[
            ("rules", &section("Rules", &numbered_list(RULES))),
            ("variables", &section("Known variables", &known)),
            ("format", &section("Output", &render(FORMAT, &[]))),
        ],
    )
}

/// Follow-up message after a reply that could not be used.
pub fn correction_prompt(error: &str) -> String {
    format!(
        "Your previous reply could not be used: {}. \
Reply again with only the JSON object in the format described, without any other text.",
        error
    )
}
