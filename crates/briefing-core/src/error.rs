//! Error types shared by the supervisor, sessions, registry and engines

use thiserror::Error;

/// A worker process could not be spawned
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Command not found: {command}. Is it installed and in PATH?")]
    CommandNotFound { command: String },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} is not configured")]
    UnknownWorker(String),

    #[error("Worker {name} started without {stream}")]
    MissingStream { name: String, stream: &'static str },
}

/// Failures while talking to a worker over its session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handshake or capability discovery failed
    #[error("Failed to connect to {name}: {reason}")]
    Connect { name: String, reason: String },

    /// Stream closed, malformed frame or write failure
    #[error("Transport fault: {0}")]
    Transport(String),

    #[error("Request {method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    /// JSON-RPC error object returned by the peer
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Session {0} is disconnected")]
    Disconnected(String),
}

impl SessionError {
    /// True for JSON-RPC "method not found", used to detect peers without resources
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, SessionError::Rpc { code, .. } if *code == -32601)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Transport(format!("malformed frame: {}", err))
    }
}

/// Registry lookup and dispatch failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' not found in registry")]
    UnknownTool(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failure reported by (or while reaching) the reasoning engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("API key not found in environment variable: {0}")]
    MissingApiKey(String),

    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}
