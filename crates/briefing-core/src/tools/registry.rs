//! Tool registry for the unified tool namespace
//!
//! Every tool is reachable as `server.tool`. The bare name is taken by the
//! first provider (in enumeration order) that lists it; later providers with
//! the same tool are only reachable through their qualified name.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ai::types::AiTool;
use crate::error::{RegistryError, SessionError};
use crate::mcp::protocol::{ToolDescriptor, ToolResult};

/// Anything that owns a tool catalog and can execute its tools
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Server name, used as the qualifier in `server.tool`
    fn name(&self) -> &str;

    /// Current catalog
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Execute a tool by its provider-local name
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, SessionError>;
}

/// Catalog entry as shown to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub server: String,
    pub description: String,
    pub input_schema: Value,
}

/// Where a registry name points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub server: String,
    pub tool: String,
}

#[derive(Clone)]
struct RegistryEntry {
    provider: Arc<dyn ToolProvider>,
    descriptor: ToolDescriptor,
}

impl RegistryEntry {
    fn server(&self) -> &str {
        self.provider.name()
    }

    fn description(&self) -> String {
        match self.descriptor.description.as_deref() {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("Tool from {} server", self.server()),
        }
    }

    fn schema(&self) -> Value {
        match &self.descriptor.input_schema {
            Some(schema) if !schema.is_null() => schema.clone(),
            _ => empty_schema(),
        }
    }

    fn info(&self, name: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            server: self.server().to_string(),
            description: self.description(),
            input_schema: self.schema(),
        }
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

/// Immutable view of the namespace, replaced wholesale on refresh
#[derive(Default)]
struct Snapshot {
    qualified: HashMap<String, RegistryEntry>,
    short: HashMap<String, RegistryEntry>,
    /// Bare names in registration order
    order: Vec<String>,
}

impl Snapshot {
    fn build(providers: &[Arc<dyn ToolProvider>]) -> Self {
        let mut snapshot = Snapshot::default();

        for provider in providers {
            for descriptor in provider.tools() {
                let entry = RegistryEntry {
                    provider: Arc::clone(provider),
                    descriptor,
                };
                let short_name = entry.descriptor.name.clone();
                let qualified_name = format!("{}.{}", provider.name(), short_name);

                if let Some(owner) = snapshot.short.get(&short_name) {
                    tracing::debug!(
                        tool = %short_name,
                        owner = %owner.server(),
                        shadowed = %provider.name(),
                        "Bare tool name already taken"
                    );
                } else {
                    snapshot.short.insert(short_name.clone(), entry.clone());
                    snapshot.order.push(short_name);
                }

                tracing::debug!(tool = %qualified_name, "Registered tool");
                snapshot.qualified.insert(qualified_name, entry);
            }
        }

        snapshot
    }

    /// Qualified names take precedence so `server.tool` always reaches that server
    fn lookup(&self, name: &str) -> Option<&RegistryEntry> {
        self.qualified.get(name).or_else(|| self.short.get(name))
    }
}

/// Unified tool namespace over all providers
pub struct ToolRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Build a registry from providers in one go
    pub fn from_providers(providers: &[Arc<dyn ToolProvider>]) -> Self {
        let registry = Self::new();
        registry.refresh(providers);
        registry
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Rebuild from the providers, in the order given
    pub fn refresh(&self, providers: &[Arc<dyn ToolProvider>]) {
        let snapshot = Snapshot::build(providers);
        tracing::info!(
            providers = providers.len(),
            tools = snapshot.order.len(),
            qualified = snapshot.qualified.len(),
            "Tool registry refreshed"
        );
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Bare-name entries in registration order
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let snapshot = self.current();
        snapshot
            .order
            .iter()
            .filter_map(|name| snapshot.short.get(name).map(|e| e.info(name)))
            .collect()
    }

    /// Catalog for the reasoning engine
    pub fn tools_for_engine(&self) -> Vec<AiTool> {
        self.list_tools()
            .into_iter()
            .map(|info| AiTool {
                name: info.name,
                description: info.description,
                input_schema: info.input_schema,
            })
            .collect()
    }

    /// Full entry for any registry name, qualified or bare
    pub fn describe(&self, name: &str) -> Option<ToolInfo> {
        self.current().lookup(name).map(|e| e.info(name))
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedTool> {
        self.current().lookup(name).map(|e| ResolvedTool {
            server: e.server().to_string(),
            tool: e.descriptor.name.clone(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current().lookup(name).is_some()
    }

    /// Number of bare names
    pub fn len(&self) -> usize {
        self.current().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch to the owning provider using its local tool name
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, RegistryError> {
        let entry = self
            .current()
            .lookup(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        tracing::info!(
            tool = %name,
            server = %entry.server(),
            actual = %entry.descriptor.name,
            "Calling tool"
        );

        Ok(entry
            .provider
            .call_tool(&entry.descriptor.name, arguments)
            .await?)
    }
}
