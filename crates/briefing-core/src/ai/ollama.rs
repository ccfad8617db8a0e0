//! Ollama engine
//!
//! Local models over `/api/chat` without native tool support. Tools are
//! described in the system prompt and calls are recovered from JSON the
//! model writes into its reply.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info};

use super::engine::ReasoningEngine;
use super::types::{AiTool, ContentBlock, Message, Role, Turn};
use crate::config::LlmConfig;
use crate::constants::llm;
use crate::error::EngineError;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());
static BARE_TOOL_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{[^}]*"tool"[^}]*\}"#).unwrap());

pub struct OllamaEngine {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OllamaEngine {
    pub fn from_config(config: &LlmConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| llm::DEFAULT_OLLAMA_MODEL.to_string());
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| llm::DEFAULT_OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        info!("Using Ollama model {} at {}", model, base_url);

        Ok(Self {
            http,
            base_url,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_messages(
        &self,
        messages: &[Message],
        tools: Option<&[AiTool]>,
        system: Option<&str>,
    ) -> Vec<Value> {
        let mut system_text = system.unwrap_or_default().to_string();
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            if !system_text.is_empty() {
                system_text.push_str("\n\n");
            }
            system_text.push_str(&format_tools_for_prompt(tools));
        }

        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system_text.is_empty() {
            out.push(json!({"role": "system", "content": system_text}));
        }
        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push(json!({"role": role, "content": flatten_content(&message.content)}));
        }
        out
    }
}

/// Render structured blocks as plain text for a model without tool support
fn flatten_content(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::ToolUse { name, input, .. } => {
                let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
                format!("[Using tool: {}]\nInput: {}", name, input)
            }
            ContentBlock::ToolResult { content, .. } => format!("[Tool Result]\n{}", content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_tools_for_prompt(tools: &[AiTool]) -> String {
    let mut text = String::from("\n## Available Tools\n\n");
    text.push_str(
        "You have access to the following tools. To use a tool, respond with a JSON block:\n",
    );
    text.push_str("```json\n{\"tool\": \"tool_name\", \"arguments\": {...}}\n```\n\n");

    for tool in tools {
        text.push_str(&format!("### {}\n{}\n", tool.name, tool.description));

        let properties = tool.input_schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties.filter(|p| !p.is_empty()) {
            let required: Vec<&str> = tool
                .input_schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            text.push_str("Arguments:\n");
            for (prop, details) in properties {
                let prop_type = details.get("type").and_then(Value::as_str).unwrap_or("string");
                let desc = details
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let marker = if required.contains(&prop.as_str()) {
                    "required"
                } else {
                    "optional"
                };
                text.push_str(&format!("- {} ({}) ({}): {}\n", prop, prop_type, marker, desc));
            }
        }
        text.push('\n');
    }
    text
}

/// Tool calls the model wrote as JSON, limited to tools in the catalog
fn extract_tool_calls(text: &str, tools: &[AiTool]) -> Vec<ContentBlock> {
    let mut candidates: Vec<&str> = FENCED_JSON
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if candidates.is_empty() {
        candidates = BARE_TOOL_JSON.find_iter(text).map(|m| m.as_str()).collect();
    }

    candidates
        .into_iter()
        .filter_map(|candidate| {
            let data: Value = serde_json::from_str(candidate).ok()?;
            let name = data
                .get("tool")
                .or_else(|| data.get("name"))
                .and_then(Value::as_str)?;
            if !tools.iter().any(|t| t.name == name) {
                debug!(tool = %name, "Model referenced a tool outside the catalog");
                return None;
            }
            let arguments = ["arguments", "input", "args"]
                .iter()
                .find_map(|key| data.get(*key).filter(|v| !v.is_null()))
                .cloned()
                .unwrap_or_else(|| json!({}));

            let id = uuid::Uuid::new_v4().simple().to_string();
            Some(ContentBlock::ToolUse {
                id: format!("tool_{}", &id[..8]),
                name: name.to_string(),
                input: arguments,
            })
        })
        .collect()
}

#[async_trait]
impl ReasoningEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[AiTool]>,
        system: Option<&str>,
    ) -> Result<Turn, EngineError> {
        let body = json!({
            "model": self.model,
            "messages": self.build_messages(messages, tools, system),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            }
        });

        debug!(messages = messages.len(), "Calling Ollama");

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    error!("Cannot connect to Ollama at {} - is it running? (ollama serve)", self.base_url);
                } else if e.is_timeout() {
                    error!("Ollama request timed out - model may be too slow");
                }
                EngineError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response.json().await?;
        let text = data
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::InvalidResponse("missing message.content".to_string()))?
            .to_string();

        let mut content = vec![ContentBlock::text(text.clone())];
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            let calls = extract_tool_calls(&text, tools);
            if !calls.is_empty() {
                info!("Extracted {} tool call(s)", calls.len());
            }
            content.extend(calls);
        }

        Ok(Turn {
            content,
            stop_reason: Some(
                data.get("done_reason")
                    .and_then(Value::as_str)
                    .unwrap_or("stop")
                    .to_string(),
            ),
        })
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Api {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        info!("Connected to Ollama at {}", self.base_url);
        Ok(())
    }
}
