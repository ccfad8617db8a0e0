//! Reasoning engine layer
//!
//! Conversation types plus the Anthropic and Ollama providers behind one trait.

pub mod anthropic;
pub mod engine;
pub mod ollama;
pub mod types;

pub use engine::{create_engine, ReasoningEngine};
pub use types::{AiTool, AiToolCall, ContentBlock, Message, Role, Turn};
