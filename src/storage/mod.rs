//! Storage backends for BeemFlow
//!
//! Provides multiple storage backends with a unified trait interface.

pub mod memory;
pub mod postgres;
pub mod sql_common;
pub mod sqlite;

use crate::{Result, model::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Storage trait for persisting flows, runs, and state
#[async_trait]
pub trait Storage: Send + Sync {
    // Run methods
    /// Save a run
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Get a run by ID
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    /// List runs, most recent first, paginated
    async fn list_runs(&self, limit: usize, offset: usize) -> Result<Vec<Run>>;

    /// List runs for a flow with a given status, optionally excluding one run id.
    /// Used by the cron sweep to avoid starting overlapping runs of the same flow.
    async fn list_runs_by_flow_and_status(
        &self,
        flow_name: &str,
        status: RunStatus,
        exclude_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Run>>;

    /// Delete a run and its steps
    async fn delete_run(&self, id: Uuid) -> Result<()>;

    /// Try to insert a run atomically
    /// Returns true if inserted, false if run already exists (based on ID)
    async fn try_insert_run(&self, run: &Run) -> Result<bool>;

    // Step methods
    /// Save a step execution
    async fn save_step(&self, step: &StepRun) -> Result<()>;

    /// Get steps for a run
    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>>;

    // Wait/timeout methods
    /// Register a wait token with optional wake time
    async fn register_wait(&self, token: Uuid, wake_at: Option<i64>) -> Result<()>;

    /// Resolve a wait token (returns run if found)
    async fn resolve_wait(&self, token: Uuid) -> Result<Option<Run>>;

    // Paused run methods
    /// Save a paused run (for await_event), indexed by its event source so
    /// an incoming event can find every run waiting on that source without
    /// scanning the full table.
    async fn save_paused_run(
        &self,
        token: &str,
        source: &str,
        data: serde_json::Value,
    ) -> Result<()>;

    /// Load all paused runs
    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>>;

    /// Find paused runs awaiting events from a given source
    async fn find_paused_runs_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<(String, serde_json::Value)>>;

    /// Delete a paused run
    async fn delete_paused_run(&self, token: &str) -> Result<()>;

    /// Atomically fetch and delete a paused run
    /// Returns None if not found, preventing double-resume
    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>>;

    // Flow management methods (for operations layer)
    /// Save a flow definition
    async fn save_flow(&self, name: &str, content: &str, version: Option<&str>) -> Result<()>;

    /// Get a flow definition  
    async fn get_flow(&self, name: &str) -> Result<Option<String>>;

    /// List all flow names
    async fn list_flows(&self) -> Result<Vec<String>>;

    /// Delete a flow
    async fn delete_flow(&self, name: &str) -> Result<()>;

    // Flow versioning methods
    /// Deploy a flow version
    async fn deploy_flow_version(
        &self,
        flow_name: &str,
        version: &str,
        content: &str,
    ) -> Result<()>;

    /// Set the deployed version for a flow
    async fn set_deployed_version(&self, flow_name: &str, version: &str) -> Result<()>;

    /// Get the currently deployed version
    async fn get_deployed_version(&self, flow_name: &str) -> Result<Option<String>>;

    /// Get content for a specific flow version
    async fn get_flow_version_content(
        &self,
        flow_name: &str,
        version: &str,
    ) -> Result<Option<String>>;

    /// List all versions of a flow
    async fn list_flow_versions(&self, flow_name: &str) -> Result<Vec<FlowSnapshot>>;

    /// Find the most recently deployed version recorded in history, ignoring
    /// whichever version is currently marked live. Used by rollback.
    async fn get_latest_deployed_version_from_history(
        &self,
        flow_name: &str,
    ) -> Result<Option<String>>;

    /// Clear the currently deployed version for a flow (used by disable).
    async fn unset_deployed_version(&self, flow_name: &str) -> Result<()>;

    /// List the currently deployed flows as (name, content) pairs.
    /// Used by the cron sweep to find flows with a `cron:` schedule.
    async fn list_all_deployed_flows(&self) -> Result<Vec<(String, String)>>;

    /// Find deployed flow names that trigger on a given topic
    async fn find_flow_names_by_topic(&self, topic: &str) -> Result<Vec<String>>;
}

/// Flow snapshot represents a deployed flow version
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowSnapshot {
    pub flow_name: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
    pub is_live: bool,
}

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> crate::Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "sqlite" => Ok(Arc::new(SqliteStorage::new(&config.dsn).await?)),
        "postgres" => Ok(Arc::new(PostgresStorage::new(&config.dsn).await?)),
        _ => Err(crate::BeemFlowError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite, postgres",
            config.driver
        ))),
    }
}

#[cfg(test)]
mod memory_test;
#[cfg(test)]
mod postgres_test;
#[cfg(test)]
mod sqlite_test;
