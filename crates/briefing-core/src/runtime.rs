//! Runtime wiring
//!
//! Starts the configured workers, attaches a session to each, and builds the
//! tool registry over whatever connected. Agent loops are created on demand.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{AgentLoop, Mode};
use crate::ai::ReasoningEngine;
use crate::config::BriefingConfig;
use crate::mcp::SessionManager;
use crate::process::ProcessSupervisor;
use crate::tools::ToolRegistry;

pub struct BriefingRuntime {
    config: BriefingConfig,
    supervisor: Arc<ProcessSupervisor>,
    sessions: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    launched: HashMap<String, bool>,
    connected: HashMap<String, bool>,
}

impl BriefingRuntime {
    /// Launch workers, connect sessions and populate the registry.
    ///
    /// Workers that fail to launch or handshake are logged and left out; the
    /// runtime still starts with whatever is available.
    pub async fn start(config: BriefingConfig) -> Result<Self> {
        let supervisor = Arc::new(
            ProcessSupervisor::new(config.worker_specs())
                .with_grace_period(config.session.stop_grace())
                .with_settle_delay(config.session.launch_settle()),
        );

        let launched = supervisor.start_all().await;
        let started = launched.values().filter(|ok| **ok).count();
        info!("Started {}/{} workers", started, launched.len());

        if started > 0 {
            tokio::time::sleep(config.session.post_start_settle()).await;
        }

        let sessions = Arc::new(SessionManager::new(config.session.request_timeout()));
        let connected = sessions.connect_all(&supervisor).await;

        let registry = Arc::new(ToolRegistry::from_providers(&sessions.providers().await));
        if registry.is_empty() {
            warn!("No tools available from any worker");
        } else {
            info!(
                "Registry holds {} tools from {} sessions",
                registry.len(),
                sessions.names().await.len()
            );
        }

        Ok(Self {
            config,
            supervisor,
            sessions,
            registry,
            launched,
            connected,
        })
    }

    /// Drop dead sessions, re-query the rest and rebuild the registry
    pub async fn refresh_tools(&self) {
        self.sessions.prune_dead().await;
        for session in self.sessions.sessions().await {
            if let Err(e) = session.refresh_capabilities().await {
                warn!(worker = %session.name(), "Failed to refresh capabilities: {}", e);
            }
        }
        self.registry.refresh(&self.sessions.providers().await);
    }

    /// Agent loop over this runtime's registry
    pub fn agent(&self, engine: Arc<dyn ReasoningEngine>, mode: Mode) -> AgentLoop {
        AgentLoop::new(engine, Arc::clone(&self.registry), &self.config.agent, mode)
    }

    /// Disconnect every session, then stop every worker
    pub async fn shutdown(&self) {
        info!("Shutting down runtime");
        self.sessions.disconnect_all().await;
        let stopped = self.supervisor.stop_all().await;
        for (name, ok) in stopped {
            if !ok {
                warn!(worker = %name, "Worker did not stop cleanly");
            }
        }
    }

    pub fn config(&self) -> &BriefingConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Launch outcome per configured worker
    pub fn launched(&self) -> &HashMap<String, bool> {
        &self.launched
    }

    /// Session outcome per configured worker
    pub fn connected(&self) -> &HashMap<String, bool> {
        &self.connected
    }
}
