//! Cron scheduling functionality for BeemFlow
//!
//! Flows that declare a `cron` expression are checked against a rolling
//! 5-minute window and started through the engine, same as any other run.
//! There is no in-process scheduler; sweeps are driven externally by the
//! `/cron` HTTP routes or the CLI's `cron` subcommand.

use crate::Result;
use crate::core::Dependencies;
use crate::model::Flow;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Cron manager for handling cron-based flow execution
#[derive(Clone)]
pub struct CronManager {
    deps: Arc<Dependencies>,
}

impl CronManager {
    pub fn new(deps: Arc<Dependencies>) -> Self {
        Self { deps }
    }

    /// Check all deployed flows for cron schedules and execute those that are due
    pub async fn check_and_execute_cron_flows(&self) -> Result<CronExecutionResult> {
        let flows_dir = crate::config::get_flows_dir(&self.deps.config);
        let flow_names = crate::storage::flows::list_flows(&flows_dir).await?;

        let mut triggered = Vec::new();
        let mut errors = Vec::new();
        let mut checked = 0;
        let now = Utc::now();

        for flow_name in &flow_names {
            match crate::storage::flows::get_flow(&flows_dir, flow_name).await {
                Ok(Some(content)) => match crate::dsl::parse_string(&content) {
                    Ok(flow) => {
                        if Self::has_schedule_cron_trigger(&flow) {
                            checked += 1;

                            if let Some(cron_expr) = &flow.cron {
                                match Schedule::from_str(cron_expr) {
                                    Ok(schedule) => {
                                        if Self::should_run_now(&schedule, &now, Duration::minutes(5)) {
                                            match self.trigger_flow(&flow, "schedule.cron").await {
                                                Ok(_) => triggered.push(flow_name.clone()),
                                                Err(e) => errors.push(format!("{}: {}", flow_name, e)),
                                            }
                                        }
                                    }
                                    Err(_) => errors
                                        .push(format!("{}: invalid cron expression", flow_name)),
                                }
                            } else {
                                errors.push(format!("{}: missing cron expression", flow_name));
                            }
                        }
                    }
                    Err(e) => errors.push(format!("{}: {}", flow_name, e)),
                },
                Ok(None) => errors.push(format!("{}: flow not found", flow_name)),
                Err(e) => errors.push(format!("{}: {}", flow_name, e)),
            }
        }

        Ok(CronExecutionResult {
            status: "completed".to_string(),
            timestamp: now.to_rfc3339(),
            triggered: triggered.len(),
            workflows: triggered,
            errors,
            checked,
            total: flow_names.len(),
        })
    }

    /// Trigger a single named workflow unconditionally, bypassing the time window.
    pub async fn execute_workflow_cron(&self, workflow: &str) -> Result<()> {
        let flows_dir = crate::config::get_flows_dir(&self.deps.config);
        let content = crate::storage::flows::get_flow(&flows_dir, workflow)
            .await?
            .ok_or_else(|| crate::BeemFlowError::validation(format!("flow not found: {workflow}")))?;

        let flow = crate::dsl::parse_string(&content)?;
        self.trigger_flow(&flow, "schedule.cron").await
    }

    async fn trigger_flow(&self, flow: &Flow, trigger: &str) -> Result<()> {
        let mut event_data = HashMap::new();
        event_data.insert("trigger".to_string(), Value::String(trigger.to_string()));
        event_data.insert(
            "workflow".to_string(),
            Value::String(flow.name.clone()),
        );
        event_data.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        self.deps.engine.execute(flow, event_data).await?;

        tracing::info!(
            "Successfully triggered cron workflow: {} at {}",
            flow.name,
            Utc::now().to_rfc3339()
        );
        Ok(())
    }

    /// Check if a flow has a schedule.cron trigger
    fn has_schedule_cron_trigger(flow: &Flow) -> bool {
        flow.cron.is_some()
    }

    /// Check if a cron schedule should run within the given time window
    fn should_run_now(schedule: &Schedule, now: &DateTime<Utc>, window: Duration) -> bool {
        let window_start = *now - window;
        let window_end = *now + Duration::minutes(1);

        let next_run = schedule.upcoming(chrono::Utc).next();

        if let Some(scheduled_time) = next_run {
            scheduled_time > window_start && scheduled_time <= window_end
        } else {
            false
        }
    }
}

/// Result of cron execution check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronExecutionResult {
    pub status: String,
    pub timestamp: String,
    pub triggered: usize,
    pub workflows: Vec<String>,
    pub errors: Vec<String>,
    pub checked: usize,
    pub total: usize,
}

impl Default for CronExecutionResult {
    fn default() -> Self {
        Self {
            status: "completed".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            triggered: 0,
            workflows: Vec::new(),
            errors: Vec::new(),
            checked: 0,
            total: 0,
        }
    }
}
