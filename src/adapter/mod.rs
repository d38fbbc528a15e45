//! Adapter system for tool execution
//!
//! Adapters provide a unified interface for executing different types of tools.

pub mod core;
pub mod http;
pub mod mcp;

use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tool manifest information
#[derive(Debug, Clone)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub kind: String,
    pub version: Option<String>,
    pub parameters: HashMap<String, Value>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

/// Execution context passed into every adapter invocation.
///
/// Carries the run/step identifiers (for logging) and a cancellation token
/// so every adapter family - core, http, mcp - honors cancellation the same
/// way regardless of transport.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub step_id: String,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, step_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            cancel,
        }
    }

    /// True if the owning run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A context with a fresh, uncancelled token, for tests and one-off
    /// adapter calls outside a scheduled run (e.g. the CLI's direct invoke).
    pub fn for_testing() -> Self {
        Self {
            run_id: Uuid::nil(),
            step_id: "test".to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Adapter trait for tool execution
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Get adapter ID
    fn id(&self) -> &str;

    /// Execute a tool with given inputs under the given execution context
    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>>;

    /// Get tool manifest (if applicable)
    fn manifest(&self) -> Option<ToolManifest>;

    /// Get self as Any for downcasting
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Registry of adapters - uses DashMap for lock-free concurrent access
pub struct AdapterRegistry {
    adapters: Arc<DashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    /// Create a new adapter registry
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(DashMap::new()),
        }
    }

    /// Register an adapter
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Get an adapter by ID
    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(id).map(|entry| Arc::clone(&*entry))
    }

    /// Get all adapters
    pub fn all(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters
            .iter()
            .map(|entry| Arc::clone(&*entry))
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub use core::CoreAdapter;
pub use http::HttpAdapter;

pub use mcp::McpAdapter;
