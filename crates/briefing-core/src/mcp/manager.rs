//! Session manager - one session per running worker
//!
//! Attaches sessions to the supervisor's running workers in configuration
//! order. Workers whose handshake fails are logged and left out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::McpSession;
use crate::constants;
use crate::process::ProcessSupervisor;
use crate::tools::ToolProvider;

/// Connected sessions, kept in the order they were attached
pub struct SessionManager {
    sessions: RwLock<Vec<Arc<McpSession>>>,
    timeout: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(constants::mcp::REQUEST_TIMEOUT_SECS))
    }
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Connect a session to every running worker, in configuration order
    pub async fn connect_all(&self, supervisor: &ProcessSupervisor) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        for name in supervisor.worker_names() {
            if !supervisor.is_running(&name) {
                warn!(worker = %name, "Worker is not running, skipping connection");
                results.insert(name, false);
                continue;
            }
            let ok = self.connect(supervisor, &name).await;
            results.insert(name, ok);
        }

        results
    }

    /// Attach a session to one running worker. An existing session is replaced.
    pub async fn connect(&self, supervisor: &ProcessSupervisor, name: &str) -> bool {
        self.disconnect(name).await;

        let stdio = match supervisor.take_stdio(name) {
            Ok(stdio) => stdio,
            Err(e) => {
                warn!(worker = %name, error = %e, "Cannot attach session");
                return false;
            }
        };

        match McpSession::connect(name, stdio, self.timeout).await {
            Ok(session) => {
                self.sessions.write().await.push(Arc::new(session));
                info!(worker = %name, "Session attached");
                true
            }
            Err(e) => {
                warn!(worker = %name, error = %e, "Failed to connect session");
                false
            }
        }
    }

    /// Disconnect and forget one session
    pub async fn disconnect(&self, name: &str) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions
                .iter()
                .position(|s| s.name() == name)
                .map(|idx| sessions.remove(idx))
        };
        if let Some(session) = removed {
            session.disconnect().await;
        }
    }

    /// Disconnect every session. Safe to repeat.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain(..).collect();
        for session in sessions {
            session.disconnect().await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<McpSession>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Session names in attach order
    pub async fn names(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub async fn sessions(&self) -> Vec<Arc<McpSession>> {
        self.sessions.read().await.clone()
    }

    /// Forget sessions whose receive loop has ended (worker exited or
    /// stream closed). Returns the names removed.
    pub async fn prune_dead(&self) -> Vec<String> {
        let dead: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            let (alive, dead): (Vec<_>, Vec<_>) =
                sessions.drain(..).partition(|s| s.is_alive());
            *sessions = alive;
            dead
        };

        let mut names = Vec::with_capacity(dead.len());
        for session in dead {
            warn!(worker = %session.name(), "Dropping dead session");
            session.disconnect().await;
            names.push(session.name().to_string());
        }
        names
    }

    /// Live sessions as tool providers, for the registry
    pub async fn providers(&self) -> Vec<Arc<dyn ToolProvider>> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|s| s.is_alive())
            .map(|s| Arc::clone(s) as Arc<dyn ToolProvider>)
            .collect()
    }
}
