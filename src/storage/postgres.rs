//! PostgreSQL storage backend
//!
//! Provides a production-ready PostgreSQL implementation of the Storage trait.

use super::{FlowSnapshot, Storage, sql_common::*};
use crate::{BeemFlowError, Result, model::*};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;
use uuid::Uuid;

/// PostgreSQL storage implementation
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a new PostgreSQL storage from a connection string
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(|e| {
            BeemFlowError::storage(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        // Run PostgreSQL-specific migrations
        sqlx::migrate!("./migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| BeemFlowError::storage(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }
    fn parse_run(row: &PgRow) -> Result<Run> {
        Ok(Run {
            id: row.try_get("id")?,
            flow_name: row.try_get::<String, _>("flow_name")?.into(),
            event: parse_hashmap_from_jsonb(row.try_get("event")?),
            vars: parse_hashmap_from_jsonb(row.try_get("vars")?),
            status: parse_run_status(&row.try_get::<String, _>("status")?),
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            steps: None,
        })
    }

    fn parse_step(row: &PgRow) -> Result<StepRun> {
        let outputs_json: serde_json::Value = row.try_get("outputs")?;

        Ok(StepRun {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_name: row.try_get::<String, _>("step_name")?.into(),
            status: parse_step_status(&row.try_get::<String, _>("status")?),
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            outputs: outputs_json
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    // Run methods
    async fn save_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, flow_name, event, vars, status, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT(id) DO UPDATE SET
                flow_name = EXCLUDED.flow_name,
                event = EXCLUDED.event,
                vars = EXCLUDED.vars,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at",
        )
        .bind(run.id)
        .bind(run.flow_name.as_str())
        .bind(serde_json::to_value(&run.event)?)
        .bind(serde_json::to_value(&run.vars)?)
        .bind(run_status_to_str(run.status))
        .bind(run.started_at)
        .bind(run.ended_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::parse_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_runs(&self, limit: usize, offset: usize) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs ORDER BY started_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::new();
        for row in rows {
            if let Ok(run) = Self::parse_run(&row) {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    async fn list_runs_by_flow_and_status(
        &self,
        flow_name: &str,
        status: RunStatus,
        exclude_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs
             WHERE flow_name = $1 AND status = $2 AND ($3::uuid IS NULL OR id != $3)
             ORDER BY started_at DESC
             LIMIT $4",
        )
        .bind(flow_name)
        .bind(run_status_to_str(status))
        .bind(exclude_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::new();
        for row in rows {
            if let Ok(run) = Self::parse_run(&row) {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    async fn delete_run(&self, id: Uuid) -> Result<()> {
        // Postgres will cascade delete steps due to foreign key
        sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn try_insert_run(&self, run: &Run) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO runs (id, flow_name, event, vars, status, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(run.id)
        .bind(run.flow_name.as_str())
        .bind(serde_json::to_value(&run.event)?)
        .bind(serde_json::to_value(&run.vars)?)
        .bind(run_status_to_str(run.status))
        .bind(run.started_at)
        .bind(run.ended_at)
        .execute(&self.pool)
        .await?;

        // Returns true if a row was inserted, false if conflict occurred
        Ok(result.rows_affected() == 1)
    }

    // Step methods
    async fn save_step(&self, step: &StepRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO steps (id, run_id, step_name, status, started_at, ended_at, outputs, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT(id) DO UPDATE SET
                run_id = EXCLUDED.run_id,
                step_name = EXCLUDED.step_name,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at,
                outputs = EXCLUDED.outputs,
                error = EXCLUDED.error"
        )
        .bind(step.id)
        .bind(step.run_id)
        .bind(step.step_name.as_str())
        .bind(step_status_to_str(step.status))
        .bind(step.started_at)
        .bind(step.ended_at)
        .bind(serde_json::to_value(&step.outputs)?)
        .bind(&step.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>> {
        let rows = sqlx::query(
            "SELECT id, run_id, step_name, status, started_at, ended_at, outputs, error
             FROM steps WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::new();
        for row in rows {
            if let Ok(step) = Self::parse_step(&row) {
                steps.push(step);
            }
        }
        Ok(steps)
    }

    // Wait/timeout methods
    async fn register_wait(&self, token: Uuid, wake_at: Option<i64>) -> Result<()> {
        sqlx::query(
            "INSERT INTO waits (token, wake_at) VALUES ($1, $2)
             ON CONFLICT(token) DO UPDATE SET wake_at = EXCLUDED.wake_at",
        )
        .bind(token.to_string())
        .bind(wake_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_wait(&self, token: Uuid) -> Result<Option<Run>> {
        sqlx::query("DELETE FROM waits WHERE token = $1")
            .bind(token.to_string())
            .execute(&self.pool)
            .await?;

        // Postgres storage doesn't resolve waits to specific runs
        Ok(None)
    }

    // Paused run methods
    async fn save_paused_run(&self, token: &str, source: &str, data: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO paused_runs (token, source, data) VALUES ($1, $2, $3)
             ON CONFLICT(token) DO UPDATE SET source = EXCLUDED.source, data = EXCLUDED.data",
        )
        .bind(token)
        .bind(source)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows = sqlx::query("SELECT token, data FROM paused_runs")
            .fetch_all(&self.pool)
            .await?;

        let mut result = HashMap::new();
        for row in rows {
            let token: String = row.try_get("token")?;
            let data: serde_json::Value = row.try_get("data")?;
            result.insert(token, data);
        }

        Ok(result)
    }

    async fn find_paused_runs_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        let rows = sqlx::query("SELECT token, data FROM paused_runs WHERE source = $1")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;

        let mut result = Vec::new();
        for row in rows {
            let token: String = row.try_get("token")?;
            let data: serde_json::Value = row.try_get("data")?;
            result.push((token, data));
        }

        Ok(result)
    }

    async fn delete_paused_run(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM paused_runs WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>> {
        // Use DELETE ... RETURNING for atomic fetch-and-delete
        let row = sqlx::query("DELETE FROM paused_runs WHERE token = $1 RETURNING data")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    // Flow management methods
    async fn save_flow(&self, name: &str, content: &str, _version: Option<&str>) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO flows (name, content, created_at, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(name) DO UPDATE SET
                content = EXCLUDED.content,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(name)
        .bind(content)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_flow(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT content FROM flows WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.try_get("content").ok()))
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM flows ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get("name").ok())
            .collect())
    }

    async fn delete_flow(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM flows WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Flow versioning methods (same as SQLite but with $N placeholders)
    async fn deploy_flow_version(
        &self,
        flow_name: &str,
        version: &str,
        content: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let topics = extract_topics_from_flow_yaml(content);

        // Start transaction
        let mut tx = self.pool.begin().await?;

        // Check if this version already exists (enforce version immutability)
        let exists = sqlx::query(
            "SELECT 1 FROM flow_versions WHERE flow_name = $1 AND version = $2 LIMIT 1",
        )
        .bind(flow_name)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_some() {
            return Err(BeemFlowError::validation(format!(
                "Version '{}' already exists for flow '{}'. Versions are immutable - use a new version number.",
                version, flow_name
            )));
        }

        // Save new version snapshot
        sqlx::query(
            "INSERT INTO flow_versions (flow_name, version, content, deployed_at)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(flow_name)
        .bind(version)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Update deployed version pointer
        sqlx::query(
            "INSERT INTO deployed_flows (flow_name, deployed_version, deployed_at)
             VALUES ($1, $2, $3)
             ON CONFLICT(flow_name) DO UPDATE SET
                deployed_version = EXCLUDED.deployed_version,
                deployed_at = EXCLUDED.deployed_at",
        )
        .bind(flow_name)
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Insert flow_triggers for this version (version is new, no need to delete first)
        for topic in topics {
            sqlx::query(
                "INSERT INTO flow_triggers (flow_name, version, topic)
                 VALUES ($1, $2, $3)
                 ON CONFLICT DO NOTHING",
            )
            .bind(flow_name)
            .bind(version)
            .bind(&topic)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_deployed_version(&self, flow_name: &str, version: &str) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO deployed_flows (flow_name, deployed_version, deployed_at)
            VALUES ($1, $2, $3)
             ON CONFLICT(flow_name) DO UPDATE SET
                deployed_version = EXCLUDED.deployed_version,
                deployed_at = EXCLUDED.deployed_at",
        )
        .bind(flow_name)
        .bind(version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_deployed_version(&self, flow_name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT deployed_version FROM deployed_flows WHERE flow_name = $1")
            .bind(flow_name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.try_get("deployed_version").ok()))
    }

    async fn get_flow_version_content(
        &self,
        flow_name: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT content FROM flow_versions WHERE flow_name = $1 AND version = $2")
                .bind(flow_name)
                .bind(version)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|r| r.try_get("content").ok()))
    }

    async fn list_flow_versions(&self, flow_name: &str) -> Result<Vec<FlowSnapshot>> {
        let rows = sqlx::query(
            "SELECT v.version, v.deployed_at,
                CASE WHEN d.deployed_version = v.version THEN true ELSE false END as is_live
             FROM flow_versions v
             LEFT JOIN deployed_flows d ON v.flow_name = d.flow_name
             WHERE v.flow_name = $1
             ORDER BY v.deployed_at DESC",
        )
        .bind(flow_name)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::new();
        for row in rows {
            let version: String = row.try_get("version")?;
            let deployed_at = row.try_get("deployed_at")?;
            let is_live: bool = row.try_get("is_live")?;

            snapshots.push(FlowSnapshot {
                flow_name: flow_name.to_string(),
                version,
                deployed_at,
                is_live,
            });
        }

        Ok(snapshots)
    }

    async fn get_latest_deployed_version_from_history(
        &self,
        flow_name: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT version FROM flow_versions
             WHERE flow_name = $1
             ORDER BY deployed_at DESC, version DESC
             LIMIT 1",
        )
        .bind(flow_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.try_get("version").ok()))
    }

    async fn unset_deployed_version(&self, flow_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM deployed_flows WHERE flow_name = $1")
            .bind(flow_name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_all_deployed_flows(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT d.flow_name, v.content
             FROM deployed_flows d
             INNER JOIN flow_versions v
                ON v.flow_name = d.flow_name AND v.version = d.deployed_version",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::new();
        for row in rows {
            let flow_name: String = row.try_get("flow_name")?;
            let content: String = row.try_get("content")?;
            result.push((flow_name, content));
        }
        Ok(result)
    }

    async fn find_flow_names_by_topic(&self, topic: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT t.flow_name
             FROM flow_triggers t
             INNER JOIN deployed_flows d
                ON d.flow_name = t.flow_name AND d.deployed_version = t.version
             WHERE t.topic = $1
             ORDER BY t.flow_name",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row.try_get("flow_name")?);
        }
        Ok(names)
    }
}
