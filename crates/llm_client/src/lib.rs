//! AI analysis gateway: provider adapters, prompt rendering and model fallback.

pub mod client;
pub mod gateway;
pub mod prompt;
pub mod types;

pub use client::{AnalysisBackend, AnthropicClient, ChatCompletionsClient, ProviderAdapter};
pub use gateway::AnalysisGateway;
pub use prompt::render_prompt;
pub use types::*;
