//! Built-in tools that act on the page through [`PageController`](crate::PageController).
//!
//! - `ClickTool` - Click an element by index
//! - `InputTextTool` - Type into a text field
//! - `SelectOptionTool` - Choose a dropdown option
//! - `ScrollTool` / `ScrollHorizontallyTool` - Scroll the page or a container
//! - `WaitTool` - Let the page settle
//! - `DoneTool` - Finish the task
//! - `ExecuteJavascriptTool` - Run a script in the page (opt-in)
//!
//! `ask_user` lives in [`user_interaction`](crate::user_interaction) because
//! it needs a handler rather than the page.

mod click;
mod done;
mod execute_js;
mod input;
mod scroll;
mod select;
mod wait;

pub use click::ClickTool;
pub use done::{DoneInput, DoneTool};
pub use execute_js::ExecuteJavascriptTool;
pub use input::InputTextTool;
pub use scroll::{ScrollHorizontallyTool, ScrollTool};
pub use select::SelectOptionTool;
pub use wait::WaitTool;

use crate::page::ActionResult;
use crate::tools::ToolRegistry;
use crate::types::ToolResult;

/// Register every built-in page tool except script execution.
pub fn register_defaults(registry: &mut ToolRegistry) -> &mut ToolRegistry {
    registry
        .register(ClickTool)
        .register(InputTextTool)
        .register(SelectOptionTool)
        .register(ScrollTool)
        .register(ScrollHorizontallyTool)
        .register(WaitTool)
        .register(DoneTool)
}

/// A registry holding the default page tools.
#[must_use]
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_defaults(&mut registry);
    registry
}

/// Failed page actions become failed tool results; the message is what the
/// model sees on its next step.
fn into_tool_result(result: ActionResult) -> ToolResult {
    let message = result.message();
    if result.success {
        ToolResult::success(message)
    } else {
        ToolResult::error(message)
    }
}
