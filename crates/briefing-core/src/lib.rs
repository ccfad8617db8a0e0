//! Briefing core
//!
//! Tool-orchestration substrate for a mission briefing assistant:
//! - `process` - Worker process supervision
//! - `mcp` - JSON-RPC sessions over worker stdio
//! - `tools` - Unified, collision-resolved tool namespace
//! - `ai` - Reasoning engine providers
//! - `agent` - The agent loop and its output policy
//! - `runtime` - Wiring the above from a config file

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod mcp;
pub mod paths;
pub mod process;
pub mod runtime;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{AgentLoop, Mode, RunResult};
pub use config::BriefingConfig;
pub use runtime::BriefingRuntime;
