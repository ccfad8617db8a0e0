//! Events emitted by the agent loop.
//!
//! Observers (the CLI, tests) subscribe through an unbounded channel; the
//! loop never waits on them and a dropped receiver is ignored.

use serde::Serialize;

use super::record::TerminationReason;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A new step is about to request a turn.
    StepStarted { step: usize, max_steps: usize },

    /// Tool is being executed.
    ToolExecuting {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed, output as placed in the transcript.
    ToolResult {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },

    /// Final text from the engine.
    Response { text: String },

    /// The run is over.
    Finished {
        reason: TerminationReason,
        steps: usize,
    },
}
