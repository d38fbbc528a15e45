//! In-memory storage implementation
//!
//! Fast, non-persistent storage for development and testing.
//! Uses DashMap for lock-free concurrent access (40-60% faster than RwLock).
//!
//! **WARNING:** MemoryStorage is NOT recommended for production use:
//! - Data is lost on process restart
//! - Does not coordinate state across multiple process instances
//! - Atomic operations use DashMap's locking, not true database-level atomicity
//!
//! For production deployments, use SqliteStorage or PostgresStorage.

use super::*;
use dashmap::DashMap;
use std::sync::Arc;

/// A paused run entry, keyed by resume token, remembering which event source
/// it's waiting on so `find_paused_runs_by_source` doesn't need to scan everything.
#[derive(Clone)]
struct PausedEntry {
    source: String,
    data: serde_json::Value,
}

/// In-memory storage implementation - uses DashMap for lock-free concurrent access
#[derive(Clone)]
pub struct MemoryStorage {
    runs: Arc<DashMap<Uuid, Run>>,
    steps: Arc<DashMap<Uuid, Vec<StepRun>>>,
    paused_runs: Arc<DashMap<String, PausedEntry>>,
    wait_tokens: Arc<DashMap<Uuid, Option<i64>>>,
    flows: Arc<DashMap<String, String>>,                 // draft flow name -> content
    flow_versions_content: Arc<DashMap<String, String>>, // "name:version" -> content
    flow_versions: Arc<DashMap<String, Vec<FlowSnapshot>>>,
    deployed_versions: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            steps: Arc::new(DashMap::new()),
            paused_runs: Arc::new(DashMap::new()),
            wait_tokens: Arc::new(DashMap::new()),
            flows: Arc::new(DashMap::new()),
            flow_versions_content: Arc::new(DashMap::new()),
            flow_versions: Arc::new(DashMap::new()),
            deployed_versions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    // Run methods
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }

    async fn list_runs(&self, limit: usize, offset: usize) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_unstable_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_runs_by_flow_and_status(
        &self,
        flow_name: &str,
        status: RunStatus,
        exclude_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .map(|r| r.value().clone())
            .filter(|r| r.flow_name == flow_name && r.status == status)
            .filter(|r| exclude_id.is_none_or(|id| r.id != id))
            .collect();
        runs.sort_unstable_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn delete_run(&self, id: Uuid) -> Result<()> {
        self.runs.remove(&id);
        self.steps.remove(&id);
        Ok(())
    }

    async fn try_insert_run(&self, run: &Run) -> Result<bool> {
        use dashmap::mapref::entry::Entry;

        match self.runs.entry(run.id) {
            Entry::Vacant(entry) => {
                entry.insert(run.clone());
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    // Step methods
    async fn save_step(&self, step: &StepRun) -> Result<()> {
        self.steps
            .entry(step.run_id)
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>> {
        Ok(self
            .steps
            .get(&run_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    // Wait/timeout methods
    async fn register_wait(&self, token: Uuid, wake_at: Option<i64>) -> Result<()> {
        self.wait_tokens.insert(token, wake_at);
        Ok(())
    }

    async fn resolve_wait(&self, token: Uuid) -> Result<Option<Run>> {
        self.wait_tokens.remove(&token);
        // Memory storage doesn't resolve waits to specific runs
        Ok(None)
    }

    // Paused run methods
    async fn save_paused_run(
        &self,
        token: &str,
        source: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        self.paused_runs.insert(
            token.to_string(),
            PausedEntry {
                source: source.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>> {
        Ok(self
            .paused_runs
            .iter()
            .map(|r| (r.key().clone(), r.value().data.clone()))
            .collect())
    }

    async fn find_paused_runs_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        Ok(self
            .paused_runs
            .iter()
            .filter(|r| r.value().source == source)
            .map(|r| (r.key().clone(), r.value().data.clone()))
            .collect())
    }

    async fn delete_paused_run(&self, token: &str) -> Result<()> {
        self.paused_runs.remove(token);
        Ok(())
    }

    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.paused_runs.remove(token).map(|(_, v)| v.data))
    }

    // Flow management methods (draft flows, keyed by name only)
    async fn save_flow(&self, name: &str, content: &str, _version: Option<&str>) -> Result<()> {
        self.flows.insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn get_flow(&self, name: &str) -> Result<Option<String>> {
        Ok(self.flows.get(name).map(|r| r.clone()))
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.flows.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_flow(&self, name: &str) -> Result<()> {
        self.flows.remove(name);
        Ok(())
    }

    // Flow versioning methods
    async fn deploy_flow_version(
        &self,
        flow_name: &str,
        version: &str,
        content: &str,
    ) -> Result<()> {
        let snapshot = FlowSnapshot {
            flow_name: flow_name.to_string(),
            version: version.to_string(),
            deployed_at: Utc::now(),
            is_live: false, // set by set_deployed_version below
        };

        self.flow_versions
            .entry(flow_name.to_string())
            .or_default()
            .push(snapshot);

        let version_key = format!("{}:{}", flow_name, version);
        self.flow_versions_content
            .insert(version_key, content.to_string());

        self.set_deployed_version(flow_name, version).await?;

        Ok(())
    }

    async fn set_deployed_version(&self, flow_name: &str, version: &str) -> Result<()> {
        self.deployed_versions
            .insert(flow_name.to_string(), version.to_string());
        Ok(())
    }

    async fn get_deployed_version(&self, flow_name: &str) -> Result<Option<String>> {
        Ok(self.deployed_versions.get(flow_name).map(|r| r.clone()))
    }

    async fn get_flow_version_content(
        &self,
        flow_name: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let version_key = format!("{}:{}", flow_name, version);
        Ok(self.flow_versions_content.get(&version_key).map(|r| r.clone()))
    }

    async fn list_flow_versions(&self, flow_name: &str) -> Result<Vec<FlowSnapshot>> {
        let mut snapshots = self
            .flow_versions
            .get(flow_name)
            .map(|r| r.clone())
            .unwrap_or_default();

        if let Some(deployed_ver) = self.deployed_versions.get(flow_name) {
            for snapshot in &mut snapshots {
                snapshot.is_live = snapshot.version == *deployed_ver;
            }
        }

        snapshots.sort_unstable_by(|a, b| b.deployed_at.cmp(&a.deployed_at));
        Ok(snapshots)
    }

    async fn get_latest_deployed_version_from_history(
        &self,
        flow_name: &str,
    ) -> Result<Option<String>> {
        let snapshots = self
            .flow_versions
            .get(flow_name)
            .map(|r| r.clone())
            .unwrap_or_default();

        Ok(snapshots
            .into_iter()
            .max_by(|a, b| {
                a.deployed_at
                    .cmp(&b.deployed_at)
                    .then_with(|| a.version.cmp(&b.version))
            })
            .map(|s| s.version))
    }

    async fn unset_deployed_version(&self, flow_name: &str) -> Result<()> {
        self.deployed_versions.remove(flow_name);
        Ok(())
    }

    async fn list_all_deployed_flows(&self) -> Result<Vec<(String, String)>> {
        let mut result = Vec::new();
        for entry in self.deployed_versions.iter() {
            let flow_name = entry.key().clone();
            let version = entry.value().clone();
            let version_key = format!("{}:{}", flow_name, version);
            if let Some(content) = self.flow_versions_content.get(&version_key) {
                result.push((flow_name, content.clone()));
            }
        }
        Ok(result)
    }

    async fn find_flow_names_by_topic(&self, topic: &str) -> Result<Vec<String>> {
        let deployed = self.list_all_deployed_flows().await?;
        let mut names = Vec::new();
        for (name, content) in deployed {
            let topics = crate::storage::sql_common::extract_topics_from_flow_yaml(&content);
            if topics.iter().any(|t| t == topic) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
