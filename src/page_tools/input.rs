use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::into_tool_result;

/// Tool for typing into a text field
pub struct InputTextTool;

#[derive(Debug, Deserialize)]
struct InputTextInput {
    index: u32,
    text: String,
}

impl Tool for InputTextTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::InputText
    }

    fn display_name(&self) -> &'static str {
        "Input Text"
    }

    fn description(&self) -> &'static str {
        "Replace the content of an input or textarea element with the given text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "minimum": 0 },
                "text": { "type": "string" }
            },
            "required": ["index", "text"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: InputTextInput =
            serde_json::from_value(input).context("Invalid input for input_text tool")?;
        let result = ctx
            .page
            .input_text(input.index, &input.text)
            .await
            .with_context(|| format!("Failed to type into element {}", input.index))?;
        Ok(into_tool_result(result))
    }
}
