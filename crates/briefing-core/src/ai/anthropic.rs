//! Anthropic Messages API engine
//!
//! Non-streaming `/v1/messages` calls. The transcript types serialize
//! directly into the API's content block shapes.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::engine::ReasoningEngine;
use super::types::{AiTool, ContentBlock, Message, Turn};
use crate::config::LlmConfig;
use crate::constants::llm;
use crate::error::EngineError;

pub struct AnthropicEngine {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicEngine {
    /// Reads the API key from the configured environment variable
    pub fn from_config(config: &LlmConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::MissingApiKey(config.api_key_env.clone()))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| llm::DEFAULT_ANTHROPIC_MODEL.to_string());
        info!("Initialized Anthropic engine with model: {}", model);

        Ok(Self {
            http,
            api_key,
            api_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| llm::DEFAULT_ANTHROPIC_URL.to_string()),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_body(&self, messages: &[Message], tools: Option<&[AiTool]>, system: Option<&str>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": messages,
        });

        if let Some(system) = system.filter(|s| !s.is_empty()) {
            body["system"] = json!(system);
        }
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
        }
        body
    }
}

/// Keep text and tool_use blocks; thinking and other block types are dropped
fn parse_response(json: &Value) -> Result<Turn, EngineError> {
    let blocks = json
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::InvalidResponse("missing content array".to_string()))?;

    let content = blocks
        .iter()
        .filter_map(|block| match block.get("type").and_then(Value::as_str) {
            Some("text") => block
                .get("text")
                .and_then(Value::as_str)
                .map(ContentBlock::text),
            Some("tool_use") => Some(ContentBlock::ToolUse {
                id: block.get("id").and_then(Value::as_str)?.to_string(),
                name: block.get("name").and_then(Value::as_str)?.to_string(),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            _ => None,
        })
        .collect();

    Ok(Turn {
        content,
        stop_reason: json
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[async_trait]
impl ReasoningEngine for AnthropicEngine {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[AiTool]>,
        system: Option<&str>,
    ) -> Result<Turn, EngineError> {
        let body = self.build_body(messages, tools, system);
        debug!(
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Calling Anthropic API"
        );

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", llm::ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response.json().await?;
        let turn = parse_response(&json)?;

        info!(
            blocks = turn.content.len(),
            tool_calls = turn.tool_calls().len(),
            stop_reason = ?turn.stop_reason,
            "Anthropic response"
        );
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AnthropicEngine {
        AnthropicEngine {
            http: reqwest::Client::new(),
            api_key: "test".to_string(),
            api_url: llm::DEFAULT_ANTHROPIC_URL.to_string(),
            model: "claude-test".to_string(),
            max_tokens: 512,
            temperature: 0.2,
        }
    }

    #[test]
    fn test_body_includes_tools_and_system_only_when_present() {
        let engine = engine();
        let messages = vec![Message::user_text("brief me")];

        let bare = engine.build_body(&messages, None, None);
        assert!(bare.get("system").is_none());
        assert!(bare.get("tools").is_none());
        assert_eq!(bare["messages"][0]["content"][0]["type"], "text");

        let tools = vec![AiTool {
            name: "search".to_string(),
            description: "Search".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let full = engine.build_body(&messages, Some(&tools), Some("be careful"));
        assert_eq!(full["system"], "be careful");
        assert_eq!(full["tools"][0]["input_schema"]["type"], "object");

        let empty = engine.build_body(&messages, Some(&[]), Some(""));
        assert!(empty.get("tools").is_none());
        assert!(empty.get("system").is_none());
    }

    #[test]
    fn test_parse_response_blocks() {
        let json = json!({
            "id": "msg_1",
            "stop_reason": "tool_use",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "x"},
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_9", "name": "read_file", "input": {"path": "a.md"}}
            ]
        });

        let turn = parse_response(&json).unwrap();
        assert_eq!(turn.content.len(), 2);
        assert_eq!(turn.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(turn.tool_calls()[0].id, "toolu_9");
        assert_eq!(turn.text_content(), "Let me look.");
    }

    #[test]
    fn test_parse_response_without_content() {
        assert!(matches!(
            parse_response(&json!({"type": "error"})),
            Err(EngineError::InvalidResponse(_))
        ));
    }
}
