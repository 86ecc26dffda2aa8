use crate::page::{ScrollAmount, ScrollOptions};
use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::into_tool_result;

/// Tool for vertical scrolling
pub struct ScrollTool;

/// Tool for horizontal scrolling
pub struct ScrollHorizontallyTool;

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ScrollInput {
    #[serde(default = "default_true")]
    down: bool,
    #[serde(default)]
    num_pages: Option<f64>,
    #[serde(default)]
    pixels: Option<u32>,
    #[serde(default)]
    index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ScrollHorizontallyInput {
    #[serde(default = "default_true")]
    right: bool,
    #[serde(default)]
    pixels: Option<u32>,
    #[serde(default)]
    index: Option<u32>,
}

/// Pixels win over pages when both are given.
fn amount(pixels: Option<u32>, num_pages: Option<f64>) -> ScrollAmount {
    pixels.map_or_else(
        || ScrollAmount::Pages(num_pages.unwrap_or(1.0)),
        ScrollAmount::Pixels,
    )
}

impl Tool for ScrollTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::Scroll
    }

    fn display_name(&self) -> &'static str {
        "Scroll"
    }

    fn description(&self) -> &'static str {
        "Scroll the page, or the scrollable element at `index`, up or down."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "down": { "type": "boolean", "description": "true to scroll down, false to scroll up" },
                "num_pages": { "type": "number", "minimum": 0, "maximum": 10 },
                "pixels": { "type": "integer", "minimum": 0 },
                "index": { "type": "integer", "minimum": 0 }
            },
            "required": ["down"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: ScrollInput =
            serde_json::from_value(input).context("Invalid input for scroll tool")?;
        let options = ScrollOptions {
            forward: input.down,
            amount: amount(input.pixels, input.num_pages),
            index: input.index,
        };
        let result = ctx.page.scroll(options).await.context("Failed to scroll")?;
        Ok(into_tool_result(result))
    }
}

impl Tool for ScrollHorizontallyTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::ScrollHorizontally
    }

    fn display_name(&self) -> &'static str {
        "Scroll Horizontally"
    }

    fn description(&self) -> &'static str {
        "Scroll the page, or the scrollable element at `index`, left or right."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "right": { "type": "boolean", "description": "true to scroll right, false to scroll left" },
                "pixels": { "type": "integer", "minimum": 0 },
                "index": { "type": "integer", "minimum": 0 }
            },
            "required": ["right"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: ScrollHorizontallyInput =
            serde_json::from_value(input).context("Invalid input for scroll_horizontally tool")?;
        let options = ScrollOptions {
            forward: input.right,
            amount: amount(input.pixels, None),
            index: input.index,
        };
        let result = ctx
            .page
            .scroll_horizontally(options)
            .await
            .context("Failed to scroll horizontally")?;
        Ok(into_tool_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InMemoryPage;
    use std::sync::Arc;

    #[test]
    fn pixels_take_precedence() {
        assert_eq!(amount(Some(300), Some(2.0)), ScrollAmount::Pixels(300));
        assert_eq!(amount(None, Some(0.5)), ScrollAmount::Pages(0.5));
        assert_eq!(amount(None, None), ScrollAmount::Pages(1.0));
    }

    #[tokio::test]
    async fn scrolls_both_axes() -> Result<()> {
        let page = Arc::new(InMemoryPage::new("https://a.test").with_page_size(3000, 3000));
        let ctx = ToolContext::new(page.clone());

        ScrollTool
            .execute(&ctx, json!({"down": true, "pixels": 250}))
            .await?;
        ScrollHorizontallyTool
            .execute(&ctx, json!({"right": true, "pixels": 100}))
            .await?;
        assert_eq!(page.scroll_position(), (100, 250));
        Ok(())
    }
}
