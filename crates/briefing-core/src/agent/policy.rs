//! Output policy applied to tool results before they reach the engine

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

/// Which output policy a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Baseline,
    Mitigated,
}

impl Mode {
    pub fn from_flag(mitigated: bool) -> Self {
        if mitigated {
            Mode::Mitigated
        } else {
            Mode::Baseline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Baseline => "baseline",
            Mode::Mitigated => "mitigated",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delimiters placed around tool output in mitigated mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MitigationMarkers {
    pub start: String,
    pub end: String,
    /// `{tool}` is replaced with the tool name
    pub reminder: String,
}

impl MitigationMarkers {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            start: config.output_start_marker.clone(),
            end: config.output_end_marker.clone(),
            reminder: config.output_reminder.clone(),
        }
    }
}

/// System prompt plus the rewrite applied to every tool result
#[derive(Debug, Clone)]
pub struct OutputPolicy {
    mode: Mode,
    system_prompt: String,
    markers: MitigationMarkers,
}

impl OutputPolicy {
    pub fn new(config: &AgentConfig, mode: Mode) -> Self {
        let system_prompt = match mode {
            Mode::Baseline => config.baseline_system_prompt.clone(),
            Mode::Mitigated => config.mitigated_system_prompt.clone(),
        };
        Self {
            mode,
            system_prompt,
            markers: MitigationMarkers::from_config(config),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode-selected system prompt, `None` when empty
    pub fn system_prompt(&self) -> Option<&str> {
        Some(self.system_prompt.as_str()).filter(|s| !s.is_empty())
    }

    /// Baseline passes output through untouched
    pub fn apply(&self, tool: &str, output: String) -> String {
        match self.mode {
            Mode::Baseline => output,
            Mode::Mitigated => {
                let reminder = self.markers.reminder.replace("{tool}", tool);
                format!(
                    "<tool_output tool=\"{tool}\">\n{start}\n\n{output}\n\n{end}\n</tool_output>\n\n{reminder}",
                    start = self.markers.start,
                    end = self.markers.end,
                )
            }
        }
    }
}
