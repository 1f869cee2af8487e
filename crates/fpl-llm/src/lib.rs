pub mod client;
pub mod prompt;

pub use client::{collect_text, ClaudeClient, LlmClient, LlmConfig, LlmEvent, TextGenerator};
pub use prompt::{build_explanation_prompt, system_prompt, ExplanationContext, TransferSummary};
