pub mod provider_kind;
pub mod repair;
pub mod types;

pub use provider_kind::{ProviderKind, RequestShaping, ToolChoice};
pub use repair::{LenientJsonRepair, RepairFailure, RepairStrategy, StrictJson};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// A chat-completions style model endpoint.
///
/// Transport and parse failures are `Err`; HTTP-level outcomes the caller
/// may want to react to (rate limits, auth, oversized prompts) are
/// [`ChatOutcome`] variants.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;
    fn model(&self) -> &str;
    fn provider(&self) -> &'static str;
}
