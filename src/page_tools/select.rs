use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::into_tool_result;

/// Tool for choosing an option of a `<select>` element
pub struct SelectOptionTool;

#[derive(Debug, Deserialize)]
struct SelectInput {
    index: u32,
    text: String,
}

impl Tool for SelectOptionTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::SelectDropdownOption
    }

    fn display_name(&self) -> &'static str {
        "Select Option"
    }

    fn description(&self) -> &'static str {
        "Select an option of a dropdown element by its visible text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "minimum": 0 },
                "text": {
                    "type": "string",
                    "description": "Visible text of the option to select"
                }
            },
            "required": ["index", "text"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: SelectInput =
            serde_json::from_value(input).context("Invalid input for select tool")?;
        let result = ctx
            .page
            .select_option(input.index, &input.text)
            .await
            .with_context(|| format!("Failed to select in element {}", input.index))?;
        Ok(into_tool_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{InMemoryPage, PageElement};
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_option_lists_choices() -> Result<()> {
        let page = Arc::new(
            InMemoryPage::new("https://a.test")
                .with_element(PageElement::new("select").options(["Small", "Large"])),
        );
        let ctx = ToolContext::new(page);

        let result = SelectOptionTool
            .execute(&ctx, json!({"index": 0, "text": "Medium"}))
            .await?;
        assert!(!result.success);
        assert!(result.output.contains("Small, Large"));
        Ok(())
    }
}
