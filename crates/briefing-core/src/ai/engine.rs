//! Reasoning engine boundary
//!
//! The agent loop only sees `ReasoningEngine`. Providers are picked once,
//! from configuration, by `create_engine`.

use async_trait::async_trait;
use std::sync::Arc;

use super::anthropic::AnthropicEngine;
use super::ollama::OllamaEngine;
use super::types::{AiTool, Message, Turn};
use crate::config::LlmConfig;
use crate::error::EngineError;

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Produce the next turn for the transcript
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[AiTool]>,
        system: Option<&str>,
    ) -> Result<Turn, EngineError>;

    /// Check the provider is reachable before a run
    async fn health_check(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Build the provider named in the config
pub fn create_engine(config: &LlmConfig) -> Result<Arc<dyn ReasoningEngine>, EngineError> {
    match config.provider.to_lowercase().as_str() {
        "anthropic" => Ok(Arc::new(AnthropicEngine::from_config(config)?)),
        "ollama" => Ok(Arc::new(OllamaEngine::from_config(config)?)),
        other => Err(EngineError::UnsupportedProvider(other.to_string())),
    }
}
