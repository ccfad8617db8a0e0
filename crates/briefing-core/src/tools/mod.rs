//! Unified tool namespace across worker sessions

pub mod registry;

pub use registry::{ResolvedTool, ToolInfo, ToolProvider, ToolRegistry};
