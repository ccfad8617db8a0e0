//! Agent loop
//!
//! - `AgentLoop` - Alternates engine turns with tool calls under a step budget
//! - `OutputPolicy` / `Mode` - Baseline passthrough or mitigated wrapping of tool output
//! - `RunResult` / `StepRecord` - What a run did, step by step
//! - `LoopEvent` - Progress stream for observers

pub mod loop_events;
pub mod policy;
pub mod record;
pub mod runner;

pub use loop_events::LoopEvent;
pub use policy::{MitigationMarkers, Mode, OutputPolicy};
pub use record::{
    RunResult, StepRecord, TerminationReason, ToolCallRecord, ToolInvocationLog,
    ToolResultRecord,
};
pub use runner::{format_tool_result, AgentLoop};
