//! Per-step records and the final result of an agent run

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::policy::Mode;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultRecord {
    pub tool: String,
    pub success: bool,
    /// Preview of the text given to the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened in one engine turn
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }
}

/// Flat log entry for every tool invocation across the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocationLog {
    pub step: usize,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The engine answered without requesting tools
    FinalResponse,
    /// The engine failed mid-run
    Error,
    /// Every step requested tools
    StepBudgetExhausted,
}

/// Outcome of `AgentLoop::run`
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    pub tool_calls: Vec<ToolInvocationLog>,
    pub num_steps: usize,
    pub termination: TerminationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Names of every tool invoked, in order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_calls.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serializes_for_reports() {
        let now = Utc::now();
        let result = RunResult {
            success: false,
            response: None,
            error: Some("Max steps reached".to_string()),
            steps: vec![StepRecord::new(1)],
            tool_calls: vec![ToolInvocationLog {
                step: 1,
                name: "search".to_string(),
                arguments: json!({"q": "x"}),
            }],
            num_steps: 1,
            termination: TerminationReason::StepBudgetExhausted,
            stop_reason: None,
            mode: Mode::Mitigated,
            started_at: now,
            finished_at: now,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["termination"], "step-budget-exhausted");
        assert_eq!(value["mode"], "mitigated");
        assert!(value["steps"][0].get("response").is_none());
        assert_eq!(result.tool_names(), vec!["search"]);
    }
}
