use crate::tools::{PageToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const MAX_WAIT_SECS: f64 = 10.0;

/// Tool for letting the page settle (loading spinners, animations)
pub struct WaitTool;

#[derive(Debug, Deserialize)]
struct WaitInput {
    #[serde(default = "default_seconds")]
    seconds: f64,
}

const fn default_seconds() -> f64 {
    1.0
}

impl Tool for WaitTool {
    type Name = PageToolName;

    fn name(&self) -> PageToolName {
        PageToolName::Wait
    }

    fn display_name(&self) -> &'static str {
        "Wait"
    }

    fn description(&self) -> &'static str {
        "Wait a few seconds for the page to finish loading or animating."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "seconds": { "type": "number", "minimum": 0, "maximum": MAX_WAIT_SECS }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<ToolResult> {
        let input: WaitInput =
            serde_json::from_value(input).context("Invalid input for wait tool")?;
        let seconds = input.seconds.clamp(0.0, MAX_WAIT_SECS);

        tokio::select! {
            () = ctx.cancel.cancelled() => Ok(ToolResult::error("Wait interrupted: the task was stopped.")),
            () = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {
                Ok(ToolResult::success(format!("Waited {seconds} seconds")))
            }
        }
    }
}
