use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::into_tool_result;

/// Tool for clicking an interactive element
pub struct ClickTool;

#[derive(Debug, Deserialize)]
struct ClickInput {
    index: u32,
}

impl Tool for ClickTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::ClickElementByIndex
    }

    fn display_name(&self) -> &'static str {
        "Click"
    }

    fn description(&self) -> &'static str {
        "Click the interactive element with the given index from the browser state."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Index of the element, as shown in [brackets] in the element tree"
                }
            },
            "required": ["index"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: ClickInput =
            serde_json::from_value(input).context("Invalid input for click tool")?;
        let result = ctx
            .page
            .click_element(input.index)
            .await
            .with_context(|| format!("Failed to click element {}", input.index))?;
        Ok(into_tool_result(result))
    }
}
