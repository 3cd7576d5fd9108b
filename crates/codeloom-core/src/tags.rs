//! The `<action>` tool-call tag format.
//!
//! Model output mixes free text with tool-call blocks:
//!
//! ```text
//! <action>
//! <invoke tool="read_file">
//!   <param name="path">src/lib.rs</param>
//! </invoke>
//! </action>
//! ```
//!
//! Param values are verbatim up to the literal `</param>` closer, so they may
//! contain newlines and unescaped `<`. The renderer below is the exact
//! inverse of the parser; the LLM transport uses it to normalize native
//! tool-call responses into the same form.

use crate::{ParamType, ToolCall, ToolDefinition};
use serde_json::Value;

pub const ACTION_OPEN: &str = "<action>";
pub const ACTION_CLOSE: &str = "</action>";

const INVOKE_OPEN: &str = "<invoke";
const INVOKE_CLOSE: &str = "</invoke>";
const PARAM_OPEN: &str = "<param";
const PARAM_CLOSE: &str = "</param>";

/// Output of one parse pass over a model response.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    /// Tool calls in emission order.
    pub calls: Vec<ToolCall>,
    /// Residual text with tool-call blocks removed.
    pub text: String,
    /// Human-readable notes about skipped malformed blocks.
    pub warnings: Vec<String>,
}

impl ParsedResponse {
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Extract the ordered tool-call list from free-form model output.
///
/// Values are decoded against the declared parameter types in `definitions`;
/// parameters of unknown tools or undeclared names stay strings. Malformed
/// blocks are skipped with a warning, never an error.
pub fn parse_response(input: &str, definitions: &[ToolDefinition]) -> ParsedResponse {
    let mut out = ParsedResponse::default();
    let mut residual = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(rel) = input[cursor..].find(ACTION_OPEN) {
        let open = cursor + rel;
        residual.push_str(&input[cursor..open]);
        let body_start = open + ACTION_OPEN.len();
        let (body, after) = match input[body_start..].find(ACTION_CLOSE) {
            Some(rel_close) => (
                &input[body_start..body_start + rel_close],
                body_start + rel_close + ACTION_CLOSE.len(),
            ),
            None => {
                out.warnings
                    .push("unterminated <action> block; parsing to end of input".to_string());
                (&input[body_start..], input.len())
            }
        };
        parse_action_body(body, definitions, &mut out);
        cursor = after;
    }
    residual.push_str(&input[cursor..]);
    out.text = residual.trim().to_string();
    out
}

fn parse_action_body(body: &str, definitions: &[ToolDefinition], out: &mut ParsedResponse) {
    let mut cursor = 0;
    while let Some(rel) = body[cursor..].find(INVOKE_OPEN) {
        let open = cursor + rel;
        let attrs_start = open + INVOKE_OPEN.len();
        let Some(tag_end_rel) = body[attrs_start..].find('>') else {
            out.warnings
                .push("malformed <invoke> tag; skipping rest of block".to_string());
            return;
        };
        let attrs = &body[attrs_start..attrs_start + tag_end_rel];
        let inner_start = attrs_start + tag_end_rel + 1;

        let Some(name) = attribute(attrs, "tool") else {
            out.warnings
                .push("<invoke> without tool attribute; skipping rest of block".to_string());
            return;
        };

        let definition = definitions.iter().find(|d| d.name == name);
        let mut call = ToolCall::new(name.clone());
        match parse_invoke_inner(body, inner_start, definition, &mut call, out) {
            Some(after) => {
                out.calls.push(call);
                cursor = after;
            }
            None => {
                out.warnings.push(format!(
                    "unclosed <invoke tool=\"{name}\">; skipping rest of block"
                ));
                return;
            }
        }
    }
}

/// Consume `<param>` elements until the matching `</invoke>`. Param values
/// are verbatim up to their own `</param>`, so a value may legally contain
/// `</invoke>`; the closer only counts when no param opens before it.
/// Returns the offset just past `</invoke>`, or `None` when it is missing.
fn parse_invoke_inner(
    body: &str,
    mut cursor: usize,
    definition: Option<&ToolDefinition>,
    call: &mut ToolCall,
    out: &mut ParsedResponse,
) -> Option<usize> {
    loop {
        let next_param = body[cursor..].find(PARAM_OPEN);
        let next_close = body[cursor..].find(INVOKE_CLOSE);
        match (next_param, next_close) {
            (Some(p), Some(c)) if p < c => {}
            (Some(_), None) => {}
            (_, Some(c)) => return Some(cursor + c + INVOKE_CLOSE.len()),
            (None, None) => return None,
        }

        let open = cursor + next_param.expect("param before close");
        let attrs_start = open + PARAM_OPEN.len();
        let tag_end_rel = match body[attrs_start..].find('>') {
            Some(rel) => rel,
            None => {
                out.warnings
                    .push(format!("malformed <param> tag in '{}'", call.name));
                return None;
            }
        };
        let attrs = &body[attrs_start..attrs_start + tag_end_rel];
        let value_start = attrs_start + tag_end_rel + 1;

        let Some(key) = attribute(attrs, "name") else {
            out.warnings
                .push(format!("<param> without name attribute in '{}'", call.name));
            cursor = value_start;
            continue;
        };

        let Some(close_rel) = body[value_start..].find(PARAM_CLOSE) else {
            out.warnings
                .push(format!("unclosed <param name=\"{key}\"> in '{}'", call.name));
            return None;
        };
        let raw = &body[value_start..value_start + close_rel];

        let declared = definition
            .and_then(|d| d.parameter(&key))
            .map(|p| p.param_type);
        call.args.insert(key, decode_value(raw, declared));

        cursor = value_start + close_rel + PARAM_CLOSE.len();
    }
}

/// Decode a raw param value per its declared type. Undeclared parameters and
/// values that fail to parse keep the raw string.
fn decode_value(raw: &str, declared: Option<ParamType>) -> Value {
    match declared {
        Some(ParamType::Boolean) => match raw.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        Some(ParamType::Number) => {
            let trimmed = raw.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                Value::from(int)
            } else if let Ok(float) = trimmed.parse::<f64>() {
                serde_json::Number::from_f64(float)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            }
        }
        Some(ParamType::Array) | Some(ParamType::Object) => {
            serde_json::from_str::<Value>(raw.trim())
                .unwrap_or_else(|_| Value::String(raw.to_string()))
        }
        Some(ParamType::String) | None => Value::String(raw.to_string()),
    }
}

/// Pull a `key="value"` attribute out of a tag's attribute list.
fn attribute(attrs: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = attrs.find(&marker)? + marker.len();
    let end = attrs[start..].find('"')? + start;
    Some(attrs[start..end].to_string())
}

/// Render one tool call in tag form (without the surrounding `<action>`).
pub fn render_invoke(name: &str, args: &serde_json::Map<String, Value>) -> String {
    let mut out = format!("<invoke tool=\"{name}\">\n");
    for (key, value) in args {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("  <param name=\"{key}\">{rendered}</param>\n"));
    }
    out.push_str("</invoke>");
    out
}

/// Render a full `<action>` block for a list of calls. The inverse of
/// [`parse_response`] for string-valued parameters.
pub fn render_action(calls: &[ToolCall]) -> String {
    let mut out = String::from(ACTION_OPEN);
    out.push('\n');
    for call in calls {
        out.push_str(&render_invoke(&call.name, &call.args));
        out.push('\n');
    }
    out.push_str(ACTION_CLOSE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolParameter;
    use proptest::prelude::*;

    fn read_file_definition() -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: vec![
                ToolParameter::required("path", ParamType::String, "path"),
                ToolParameter::optional("limit", ParamType::Number, "limit"),
                ToolParameter::optional("follow", ParamType::Boolean, "follow"),
            ],
            safe: true,
        }
    }

    #[test]
    fn parses_single_call_with_surrounding_text() {
        let input = "Let me look.\n<action>\n<invoke tool=\"read_file\">\n  <param name=\"path\">hello.txt</param>\n</invoke>\n</action>\nDone.";
        let parsed = parse_response(input, &[read_file_definition()]);
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].name, "read_file");
        assert_eq!(parsed.calls[0].str_arg("path"), Some("hello.txt"));
        assert_eq!(parsed.text, "Let me look.\n\nDone.");
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn decodes_declared_types() {
        let input = "<action><invoke tool=\"read_file\"><param name=\"limit\">42</param><param name=\"follow\">true</param><param name=\"extra\">7</param></invoke></action>";
        let parsed = parse_response(input, &[read_file_definition()]);
        let call = &parsed.calls[0];
        assert_eq!(call.args.get("limit"), Some(&Value::from(42)));
        assert_eq!(call.args.get("follow"), Some(&Value::Bool(true)));
        // Undeclared parameters stay strings.
        assert_eq!(call.args.get("extra"), Some(&Value::from("7")));
    }

    #[test]
    fn param_value_may_contain_angle_brackets_and_newlines() {
        let input = "<action><invoke tool=\"write_file\"><param name=\"content\">if a < b {\n  <tag>\n}</param></invoke></action>";
        let parsed = parse_response(input, &[]);
        assert_eq!(
            parsed.calls[0].str_arg("content"),
            Some("if a < b {\n  <tag>\n}")
        );
    }

    #[test]
    fn param_value_may_contain_closing_invoke_text() {
        let input = "<action><invoke tool=\"write_file\"><param name=\"content\">literal </invoke> inside</param></invoke></action>";
        let parsed = parse_response(input, &[]);
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(
            parsed.calls[0].str_arg("content"),
            Some("literal </invoke> inside")
        );
    }

    #[test]
    fn unclosed_invoke_is_skipped_with_warning() {
        let input = "<action><invoke tool=\"read_file\"><param name=\"path\">a</param></action>text after";
        let parsed = parse_response(input, &[]);
        assert!(parsed.calls.is_empty());
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.text, "text after");
    }

    #[test]
    fn multiple_blocks_preserve_order() {
        let input = "<action><invoke tool=\"a\"></invoke></action>middle<action><invoke tool=\"b\"></invoke><invoke tool=\"c\"></invoke></action>";
        let parsed = parse_response(input, &[]);
        let names: Vec<&str> = parsed.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(parsed.text, "middle");
    }

    #[test]
    fn render_then_parse_is_identity_for_string_args() {
        let mut call = ToolCall::new("write_file");
        call.args
            .insert("path".to_string(), Value::from("src/x.rs"));
        call.args
            .insert("content".to_string(), Value::from("fn main() {}\n"));
        let rendered = render_action(std::slice::from_ref(&call));
        let parsed = parse_response(&rendered, &[]);
        assert_eq!(parsed.calls, vec![call]);
        assert!(parsed.text.is_empty());
    }

    proptest! {
        #[test]
        fn round_trip_preserves_names_and_params(
            specs in prop::collection::vec(
                (
                    "[a-z][a-z0-9_]{0,11}",
                    prop::collection::btree_map(
                        "[a-z][a-z0-9_]{0,7}",
                        "[ -~]{0,24}".prop_filter("no closer", |s: &String| !s.contains("</param>")),
                        0..4,
                    ),
                ),
                1..4,
            )
        ) {
            let calls: Vec<ToolCall> = specs
                .iter()
                .map(|(name, params)| {
                    let mut call = ToolCall::new(name.clone());
                    for (k, v) in params {
                        call.args.insert(k.clone(), Value::from(v.clone()));
                    }
                    call
                })
                .collect();
            let rendered = render_action(&calls);
            let parsed = parse_response(&rendered, &[]);
            prop_assert_eq!(parsed.calls, calls);
            prop_assert!(parsed.warnings.is_empty());
        }
    }
}
