use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::into_tool_result;

/// Experimental tool that runs arbitrary JavaScript in the page.
///
/// Not part of the default registry; register it explicitly.
pub struct ExecuteJavascriptTool;

#[derive(Debug, Deserialize)]
struct ExecuteJsInput {
    script: String,
}

impl Tool for ExecuteJavascriptTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::ExecuteJavascript
    }

    fn display_name(&self) -> &'static str {
        "Execute JavaScript"
    }

    fn description(&self) -> &'static str {
        "Run a JavaScript snippet in the page and return its result as text. \
         Prefer the other tools; use this only when they cannot do the job."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "script": { "type": "string", "description": "Expression or function body to evaluate" }
            },
            "required": ["script"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: ExecuteJsInput =
            serde_json::from_value(input).context("Invalid input for execute_javascript tool")?;
        let result = ctx
            .page
            .execute_javascript(&input.script)
            .await
            .context("Failed to execute script")?;
        Ok(into_tool_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InMemoryPage;
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_script_result() -> Result<()> {
        let page = Arc::new(
            InMemoryPage::new("https://a.test").with_script_result("document.title", "Home"),
        );
        let ctx = ToolContext::new(page);
        let result = ExecuteJavascriptTool
            .execute(&ctx, json!({"script": "document.title"}))
            .await?;
        assert_eq!(result.output, "Home");
        Ok(())
    }
}
