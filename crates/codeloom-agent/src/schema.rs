//! Tool-definition rendering: the OpenAI-style function schema handed to the
//! transport, and the human-readable listing injected into the system prompt.

use codeloom_core::ToolDefinition;
use serde_json::{Value, json};

/// Convert definitions into chat-completions `tools` entries.
pub fn function_schemas(definitions: &[ToolDefinition]) -> Vec<Value> {
    definitions
        .iter()
        .map(|def| {
            let mut properties = serde_json::Map::new();
            let mut required: Vec<Value> = Vec::new();
            for param in &def.parameters {
                let mut spec = json!({
                    "type": param.param_type.as_str(),
                    "description": param.description,
                });
                if let Some(default) = &param.default {
                    spec["default"] = default.clone();
                }
                properties.insert(param.name.clone(), spec);
                if param.required {
                    required.push(Value::from(param.name.clone()));
                }
            }
            json!({
                "type": "function",
                "function": {
                    "name": def.name,
                    "description": def.description,
                    "parameters": {
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    },
                },
            })
        })
        .collect()
}

/// The system-prompt section describing the available tools and the tag
/// format the model must emit.
pub fn render_tool_instructions(definitions: &[ToolDefinition]) -> String {
    let mut out = String::from("\n\n## Available tools\n\n");
    for def in definitions {
        out.push_str(&format!("### {}\n{}\n", def.name, def.description));
        for param in &def.parameters {
            let requirement = if param.required { "required" } else { "optional" };
            out.push_str(&format!(
                "- {} ({}, {}): {}\n",
                param.name,
                param.param_type.as_str(),
                requirement,
                param.description
            ));
        }
        out.push('\n');
    }
    out.push_str(
        "## Calling tools\n\n\
         To call tools, emit one block in exactly this form:\n\n\
         <action>\n\
         <invoke tool=\"NAME\">\n\
         \x20 <param name=\"K1\">V1</param>\n\
         \x20 <param name=\"K2\">V2</param>\n\
         </invoke>\n\
         </action>\n\n\
         Multiple <invoke> elements run in order. Param values are taken \
         verbatim up to the closing </param>. When you are done, reply with \
         plain text and no <action> block.\n",
    );
    out
}
