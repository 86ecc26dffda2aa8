//! LLM provider implementations.
//!
//! Only the chat completions wire format is shipped; other endpoints can be
//! plugged in by implementing [`LlmProvider`](crate::llm::LlmProvider).

pub mod openai;

pub use openai::OpenAIProvider;
