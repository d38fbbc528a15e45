//! Step executor
//!
//! Handles execution of individual steps: tool invocations, parallel blocks,
//! foreach loops, durable waits, and event-driven pauses. Dependency order
//! between top-level steps is resolved by [`DependencyAnalyzer`]; everything
//! below that (nested parallel/foreach bodies, catch blocks) executes in
//! document order once its parent step starts.

use super::{PausedRun, StepContext};
use crate::adapter::{Adapter, AdapterRegistry, ExecutionContext};
use crate::constants;
use crate::dsl::{DependencyAnalyzer, Templater};
use crate::event::EventBus;
use crate::model::{RetrySpec, RunStatus, StepBody, StepRun, StepStatus};
use crate::storage::Storage;
use crate::{BeemFlowError, Flow, Result, Step};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Whether a step's body actually ran or was skipped by its `if` condition.
enum StepOutcome {
    Executed,
    Skipped,
}

/// Step executor. Constructed fresh per top-level execution (and per resume,
/// and per catch block) by the engine, carrying the previous-run snapshot
/// for `runs.previous` template access and a semaphore bounding concurrent
/// parallel/foreach work.
#[derive(Clone)]
pub struct Executor {
    adapters: Arc<AdapterRegistry>,
    templater: Arc<Templater>,
    event_bus: Arc<dyn EventBus>,
    storage: Arc<dyn Storage>,
    runs_data: Option<HashMap<String, Value>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl Executor {
    /// Create a new executor bound to a run-level cancellation token. The
    /// token is shared with the engine so an external cancel propagates to
    /// every in-flight adapter invocation and wait/await step for this run.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        templater: Arc<Templater>,
        event_bus: Arc<dyn EventBus>,
        storage: Arc<dyn Storage>,
        runs_data: Option<HashMap<String, Value>>,
        max_concurrent_tasks: usize,
        cancel: CancellationToken,
        run_id: Uuid,
    ) -> Self {
        Self {
            adapters,
            templater,
            event_bus,
            storage,
            runs_data,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            cancel,
            run_id,
        }
    }

    /// Execute steps starting from a given index.
    ///
    /// Steps run in dependency order (topological sort over `depends_on` and
    /// template references), not document order. `start_idx` is a document
    /// index into `flow.steps`, used by resume to locate where to continue.
    pub async fn execute_steps(
        &self,
        flow: &Flow,
        step_ctx: &StepContext,
        start_idx: usize,
        run_id: Uuid,
    ) -> Result<HashMap<String, Value>> {
        let analyzer = DependencyAnalyzer::new();
        let sorted_ids = analyzer.topological_sort(flow)?;

        let step_map: HashMap<&str, &Step> =
            flow.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let sorted_start_idx = if start_idx == 0 {
            0
        } else if start_idx < flow.steps.len() {
            let start_id = flow.steps[start_idx].id.as_str();
            sorted_ids
                .iter()
                .position(|id| id == start_id)
                .unwrap_or(0)
        } else {
            return Ok(step_ctx.snapshot().outputs);
        };

        for step_id in sorted_ids.iter().skip(sorted_start_idx) {
            let step = *step_map
                .get(step_id.as_str())
                .ok_or_else(|| BeemFlowError::internal(format!("step not found: {}", step_id)))?;

            if self.cancel.is_cancelled() {
                self.persist_step_result(
                    step,
                    step_ctx,
                    run_id,
                    chrono::Utc::now(),
                    StepStatus::Skipped,
                    None,
                )
                .await?;
                return Err(BeemFlowError::cancelled(format!(
                    "run {} cancelled before step '{}'",
                    run_id, step_id
                )));
            }

            if let StepBody::AwaitEvent { .. } = &step.body {
                let idx = flow
                    .steps
                    .iter()
                    .position(|s| s.id.as_str() == step_id.as_str())
                    .expect("scheduled step id must exist in flow.steps");
                return self
                    .handle_await_event(step, flow, step_ctx, idx, run_id)
                    .await;
            }

            self.run_and_record(step, step_ctx, run_id).await?;
        }

        Ok(step_ctx.snapshot().outputs)
    }

    /// Run a single top-level step and persist its `StepRun` record,
    /// propagating the step's own error (or an await-pause) to the caller.
    async fn run_and_record(&self, step: &Step, step_ctx: &StepContext, run_id: Uuid) -> Result<()> {
        let started_at = chrono::Utc::now();

        match self
            .execute_single_step(step, step_ctx, step.id.as_str())
            .await
        {
            Ok(StepOutcome::Executed) => {
                self.persist_step_result(step, step_ctx, run_id, started_at, StepStatus::Succeeded, None)
                    .await
            }
            Ok(StepOutcome::Skipped) => {
                self.persist_step_result(step, step_ctx, run_id, started_at, StepStatus::Skipped, None)
                    .await
            }
            Err(e) if matches!(e, BeemFlowError::AwaitEventPause(..)) => Err(e),
            Err(e) => {
                self.persist_step_result(
                    step,
                    step_ctx,
                    run_id,
                    started_at,
                    StepStatus::Failed,
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Execute a single step's condition and body (boxed to support the
    /// recursion that parallel/foreach bodies need).
    pub fn execute_single_step<'a>(
        &'a self,
        step: &'a Step,
        step_ctx: &'a StepContext,
        step_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(ref condition) = step.if_
                && !self.evaluate_condition(condition, step_ctx).await?
            {
                tracing::debug!("skipping step '{}': condition not met ({})", step_id, condition);
                return Ok(StepOutcome::Skipped);
            }

            match self.execute_step_body(step, step_ctx, step_id).await {
                Ok(()) => Ok(StepOutcome::Executed),
                Err(e @ (BeemFlowError::AwaitEventPause(_) | BeemFlowError::Cancelled(_))) => {
                    Err(e)
                }
                Err(e) => {
                    if let Some(catch_steps) = &step.catch {
                        tracing::debug!(
                            "step '{}' failed, running its inline catch: {}",
                            step_id,
                            e
                        );
                        self.run_catch_steps(catch_steps, step_ctx, &e).await?;
                        Ok(StepOutcome::Executed)
                    } else {
                        Err(e)
                    }
                }
            }
        })
    }

    /// Dispatch a step's body by variant. Split out from `execute_single_step`
    /// so the caller can intercept the error and run the step's inline catch.
    async fn execute_step_body(
        &self,
        step: &Step,
        step_ctx: &StepContext,
        step_id: &str,
    ) -> Result<()> {
        match &step.body {
            StepBody::Exec { use_, with } => {
                self.execute_tool_call(use_, with, step.retry.as_ref(), step_ctx, step_id)
                    .await?;
            }
            StepBody::Parallel { steps } => {
                self.execute_parallel_block(steps, step_ctx, step_id).await?;
            }
            StepBody::Foreach {
                list_expr,
                alias,
                steps,
                sequential,
            } => {
                self.execute_foreach_block(list_expr, alias, steps, *sequential, step_ctx, step_id)
                    .await?;
            }
            StepBody::Wait { seconds, until } => {
                self.execute_wait(*seconds, until.as_deref(), step_ctx).await?;
            }
            StepBody::AwaitEvent { .. } => {
                return Err(BeemFlowError::validation(format!(
                    "step '{}': await_event is only supported as a top-level flow step",
                    step_id
                )));
            }
        }
        Ok(())
    }

    /// Run a step's inline `catch` steps with the failing error exposed as
    /// `event.error`, in the same context as the failing step (so catch steps
    /// can reference its partial outputs/vars). Errors from the catch itself
    /// propagate as the step's final error.
    async fn run_catch_steps(
        &self,
        catch_steps: &[Step],
        step_ctx: &StepContext,
        error: &BeemFlowError,
    ) -> Result<()> {
        step_ctx.set_event("error".to_string(), Value::String(error.to_string()));
        for inner in catch_steps {
            self.execute_single_step(inner, step_ctx, inner.id.as_str())
                .await?;
        }
        Ok(())
    }

    /// Execute nested steps concurrently. Every child runs to completion
    /// before an error (if any) is reported, so a failing sibling never
    /// strands the outputs of the steps that succeeded alongside it.
    async fn execute_parallel_block(
        &self,
        steps: &[Step],
        step_ctx: &StepContext,
        step_id: &str,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(steps.len());

        for child in steps {
            let child = child.clone();
            let ctx = step_ctx.clone();
            let executor = self.clone();
            let semaphore = self.semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| BeemFlowError::internal(format!("executor semaphore closed: {}", e)))?;
                executor
                    .execute_single_step(&child, &ctx, child.id.as_str())
                    .await?;
                Ok::<_, BeemFlowError>(ctx.get_output(child.id.as_str()))
            }));
        }

        let mut outputs = HashMap::new();
        let mut first_error = None;

        for (child, handle) in steps.iter().zip(handles) {
            let result = handle.await.map_err(|e| {
                BeemFlowError::adapter(format!("parallel step '{}' panicked: {}", child.id, e))
            });

            match result.and_then(|inner| inner) {
                Ok(output) => {
                    if let Some(value) = output {
                        outputs.insert(child.id.to_string(), value);
                    }
                }
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        step_ctx.set_output(step_id.to_string(), serde_json::to_value(outputs)?);

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(())
    }

    /// Evaluate the list expression and execute `steps` once per element,
    /// binding `alias`/`alias_index`/`alias_row` loop variables. Iterations
    /// run concurrently (bounded by the shared semaphore) unless `sequential`
    /// is set, in which case they run one at a time sharing `step_ctx`
    /// directly so a later iteration can see an earlier one's outputs.
    async fn execute_foreach_block(
        &self,
        list_expr: &str,
        alias: &str,
        steps: &[Step],
        sequential: bool,
        step_ctx: &StepContext,
        step_id: &str,
    ) -> Result<()> {
        let template_data = step_ctx.template_data_with_runs(self.runs_data.clone());

        // Document normalization (dsl::normalize) strips the `{{ }}` delimiters
        // off shorthand foreach expressions; re-wrap so evaluate_expression
        // takes its direct-lookup path instead of falling through to
        // render()+JSON-parse, which would hand back the bare text.
        let trimmed = list_expr.trim();
        let wrapped = if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
            trimmed.to_string()
        } else {
            format!("{{{{ {} }}}}", trimmed)
        };

        let list_val = self.templater.evaluate_expression(&wrapped, &template_data)?;
        let list = list_val.as_array().cloned().ok_or_else(|| {
            BeemFlowError::validation(format!(
                "foreach expression '{}' did not evaluate to an array: {}",
                list_expr, list_val
            ))
        })?;

        if list.is_empty() {
            step_ctx.set_output(step_id.to_string(), Value::Array(Vec::new()));
            return Ok(());
        }

        if sequential {
            let mut iteration_outputs = Vec::with_capacity(list.len());

            for (index, item) in list.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Err(BeemFlowError::cancelled(format!(
                        "foreach step '{}' cancelled at iteration {}",
                        step_id, index
                    )));
                }

                step_ctx.set_var(alias.to_string(), item.clone());
                step_ctx.set_var(format!("{}_index", alias), Value::Number(index.into()));
                step_ctx.set_var(format!("{}_row", alias), Value::Number((index + 1).into()));

                for inner in steps {
                    self.execute_single_step(inner, step_ctx, inner.id.as_str())
                        .await?;
                }

                let mut iter_output = serde_json::Map::new();
                for inner in steps {
                    if let Some(v) = step_ctx.get_output(inner.id.as_str()) {
                        iter_output.insert(inner.id.to_string(), v);
                    }
                }
                iteration_outputs.push(Value::Object(iter_output));
            }

            step_ctx.set_output(step_id.to_string(), Value::Array(iteration_outputs));
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            return Err(BeemFlowError::cancelled(format!(
                "foreach step '{}' cancelled",
                step_id
            )));
        }

        let mut handles = Vec::with_capacity(list.len());

        for (index, item) in list.iter().enumerate() {
            let iter_ctx = step_ctx.fork();
            iter_ctx.set_var(alias.to_string(), item.clone());
            iter_ctx.set_var(format!("{}_index", alias), Value::Number(index.into()));
            iter_ctx.set_var(format!("{}_row", alias), Value::Number((index + 1).into()));

            let inner_steps = steps.to_vec();
            let executor = self.clone();
            let semaphore = self.semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| BeemFlowError::internal(format!("executor semaphore closed: {}", e)))?;

                for inner in &inner_steps {
                    executor
                        .execute_single_step(inner, &iter_ctx, inner.id.as_str())
                        .await?;
                }

                let mut iter_output = serde_json::Map::new();
                for inner in &inner_steps {
                    if let Some(v) = iter_ctx.get_output(inner.id.as_str()) {
                        iter_output.insert(inner.id.to_string(), v);
                    }
                }
                Ok::<_, BeemFlowError>(Value::Object(iter_output))
            }));
        }

        let mut iteration_outputs = Vec::with_capacity(list.len());
        let mut first_error = None;

        for (index, handle) in handles.into_iter().enumerate() {
            let result = handle.await.map_err(|e| {
                BeemFlowError::adapter(format!("foreach iteration {} panicked: {}", index, e))
            });

            match result.and_then(|inner| inner) {
                Ok(output) => iteration_outputs.push(output),
                Err(e) => {
                    iteration_outputs.push(Value::Null);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        step_ctx.set_output(step_id.to_string(), Value::Array(iteration_outputs));

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(())
    }

    /// Execute a tool invocation, resolving its adapter and rendering its
    /// inputs, with retry if configured.
    async fn execute_tool_call(
        &self,
        use_: &str,
        with: &HashMap<String, Value>,
        retry: Option<&RetrySpec>,
        step_ctx: &StepContext,
        step_id: &str,
    ) -> Result<()> {
        let (adapter, inject_use) = self.resolve_adapter(use_)?;

        let template_data = step_ctx.template_data_with_runs(self.runs_data.clone());
        let mut inputs = Self::render_map(&self.templater, with, &template_data)?;

        if inject_use {
            inputs.insert(
                constants::PARAM_SPECIAL_USE.to_string(),
                Value::String(use_.to_string()),
            );
        }

        let ctx = ExecutionContext::new(self.run_id, step_id, self.cancel.clone());

        let outputs = if let Some(retry) = retry {
            self.execute_with_retry(&adapter, inputs, retry, &ctx).await?
        } else {
            self.execute_adapter_with_timeout(&adapter, inputs, &ctx).await?
        };

        step_ctx.set_output(step_id.to_string(), serde_json::to_value(outputs)?);
        Ok(())
    }

    /// Run an adapter under a fixed deadline so a hung tool can't stall a run
    /// indefinitely.
    async fn execute_adapter_with_timeout(
        &self,
        adapter: &Arc<dyn Adapter>,
        inputs: HashMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>> {
        let duration = std::time::Duration::from_secs(constants::DEFAULT_TIMEOUT_SEC);
        tokio::select! {
            result = tokio::time::timeout(duration, adapter.execute(inputs, ctx)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(BeemFlowError::adapter(format!(
                        "tool '{}' timed out after {}s",
                        adapter.id(),
                        constants::DEFAULT_TIMEOUT_SEC
                    ))),
                }
            }
            _ = self.cancel.cancelled() => Err(BeemFlowError::cancelled(format!(
                "tool '{}' cancelled",
                adapter.id()
            ))),
        }
    }

    /// Execute with retry, using a flat delay between attempts.
    async fn execute_with_retry(
        &self,
        adapter: &Arc<dyn Adapter>,
        inputs: HashMap<String, Value>,
        retry: &RetrySpec,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>> {
        let attempts = retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self
                .execute_adapter_with_timeout(adapter, inputs.clone(), ctx)
                .await
            {
                Ok(outputs) => {
                    if attempt > 0 {
                        tracing::info!("step succeeded on attempt {} of {}", attempt + 1, attempts);
                    }
                    return Ok(outputs);
                }
                Err(e) if matches!(e, BeemFlowError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tracing::debug!(
                            "retrying in {}s (attempt {} of {})",
                            retry.delay_sec,
                            attempt + 2,
                            attempts
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(retry.delay_sec)).await;
                    }
                }
            }
        }

        tracing::error!("step failed after {} attempts", attempts);
        Err(last_error.unwrap_or_else(|| BeemFlowError::adapter("retry failed with no recorded error")))
    }

    /// Sleep for a fixed duration, or until an absolute RFC3339 timestamp.
    async fn execute_wait(
        &self,
        seconds: Option<u64>,
        until: Option<&str>,
        step_ctx: &StepContext,
    ) -> Result<()> {
        if let Some(seconds) = seconds {
            return self.sleep_cancellable(std::time::Duration::from_secs(seconds)).await;
        }

        if let Some(until) = until {
            let template_data = step_ctx.template_data_with_runs(self.runs_data.clone());
            let rendered = self.templater.render(until, &template_data)?;
            let target = chrono::DateTime::parse_from_rfc3339(rendered.trim())
                .map_err(|e| {
                    BeemFlowError::validation(format!(
                        "invalid 'until' timestamp '{}': {}",
                        rendered, e
                    ))
                })?
                .with_timezone(&chrono::Utc);

            let now = chrono::Utc::now();
            if target > now {
                let duration = (target - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(0));
                return self.sleep_cancellable(duration).await;
            }
        }

        Ok(())
    }

    /// Sleep for `duration`, waking early (with a cancellation error) if the
    /// run's cancellation token fires first.
    async fn sleep_cancellable(&self, duration: std::time::Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(BeemFlowError::cancelled("wait step cancelled")),
        }
    }

    /// Pause execution until a matching event arrives, persisting a
    /// [`PausedRun`] snapshot and subscribing on the event bus so a
    /// matching publish triggers resume.
    async fn handle_await_event(
        &self,
        step: &Step,
        flow: &Flow,
        step_ctx: &StepContext,
        step_idx: usize,
        run_id: Uuid,
    ) -> Result<HashMap<String, Value>> {
        let (source, match_, timeout) = match &step.body {
            StepBody::AwaitEvent {
                source,
                match_,
                timeout,
            } => (source, match_, timeout),
            _ => {
                return Err(BeemFlowError::internal(
                    "handle_await_event called on a non-await_event step",
                ));
            }
        };

        let token_val = match_
            .get(constants::MATCH_KEY_TOKEN)
            .ok_or_else(|| BeemFlowError::validation("await_event missing 'token' in match"))?;

        let template_data = step_ctx.template_data_with_runs(self.runs_data.clone());
        let rendered_token = Self::render_value(&self.templater, token_val, &template_data)?;
        let token = rendered_token
            .as_str()
            .ok_or_else(|| BeemFlowError::validation("await_event token must render to a string"))?
            .to_string();

        if token.trim().is_empty() {
            return Err(BeemFlowError::validation("await_event token cannot be empty"));
        }

        let match_criteria = match_.clone();
        let token_for_match = token.clone();
        let event_bus_for_match = self.event_bus.clone();

        let subscription_id = self
            .event_bus
            .subscribe(
                source,
                Arc::new(move |payload| {
                    if Self::matches_event_criteria(&payload, &match_criteria) {
                        tracing::info!("resume event matched for token: {}", token_for_match);
                        let resume_topic =
                            format!("{}{}", constants::EVENT_TOPIC_RESUME_PREFIX, token_for_match);
                        let bus = event_bus_for_match.clone();
                        let payload = payload.clone();
                        tokio::spawn(async move {
                            if let Err(e) = bus.publish(&resume_topic, payload).await {
                                tracing::error!("failed to publish resume event: {}", e);
                            }
                        });
                    }
                }),
            )
            .await?;

        let paused = PausedRun {
            flow: flow.clone(),
            step_idx,
            context: step_ctx.clone(),
            outputs: step_ctx.snapshot().outputs,
            token: token.clone(),
            run_id,
            subscription_id,
        };

        let paused_value = serde_json::to_value(&paused)?;
        self.storage.save_paused_run(&token, source, paused_value).await?;

        if let Some(timeout) = timeout {
            let timeout_duration = Self::parse_timeout(timeout)?;
            let timeout_token = token.clone();
            let timeout_display = timeout.clone();
            let storage = self.storage.clone();
            let event_bus = self.event_bus.clone();
            let step_name = step.id.to_string();

            tokio::spawn(async move {
                tokio::time::sleep(timeout_duration).await;

                match storage.fetch_and_delete_paused_run(&timeout_token).await {
                    // Still paused: nobody resumed it, so the wait has genuinely expired.
                    Ok(Some(_)) => {
                        tracing::warn!("await_event token {} timed out", timeout_token);
                        let _ = event_bus.unsubscribe_by_id(subscription_id).await;

                        if let Ok(Some(mut run)) = storage.get_run(run_id).await {
                            run.status = RunStatus::Failed;
                            run.ended_at = Some(chrono::Utc::now());
                            let mut steps = run.steps.take().unwrap_or_default();
                            steps.push(StepRun {
                                id: Uuid::new_v4(),
                                run_id,
                                step_name: step_name.clone(),
                                status: StepStatus::Failed,
                                started_at: chrono::Utc::now(),
                                ended_at: Some(chrono::Utc::now()),
                                error: Some(format!("await_event timed out after {}", timeout_display)),
                                outputs: None,
                            });
                            run.steps = Some(steps);
                            if let Err(e) = storage.save_run(&run).await {
                                tracing::error!(
                                    "failed to persist await_event timeout for run {}: {}",
                                    run_id,
                                    e
                                );
                            }
                        }
                    }
                    // Already resumed before the deadline: nothing to do.
                    Ok(None) => {}
                    Err(e) => tracing::error!("failed to check paused run on timeout: {}", e),
                }
            });
        }

        Err(BeemFlowError::AwaitEventPause(
            constants::ERR_AWAIT_EVENT_PAUSE.to_string(),
        ))
    }

    /// Check whether an event payload satisfies every non-token match criterion.
    fn matches_event_criteria(payload: &Value, criteria: &HashMap<String, Value>) -> bool {
        criteria
            .iter()
            .filter(|(key, _)| *key != constants::MATCH_KEY_TOKEN)
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }

    /// Parse a timeout string like "30s", "5m", or "1h".
    fn parse_timeout(timeout: &str) -> Result<std::time::Duration> {
        let trimmed = timeout.trim();

        let (value, multiplier) = if let Some(s) = trimmed.strip_suffix('s') {
            (s, 1)
        } else if let Some(m) = trimmed.strip_suffix('m') {
            (m, 60)
        } else if let Some(h) = trimmed.strip_suffix('h') {
            (h, 3600)
        } else {
            return Err(BeemFlowError::validation(format!(
                "unsupported timeout format '{}': use '30s', '5m', or '1h'",
                timeout
            )));
        };

        value
            .parse::<u64>()
            .map(|v| std::time::Duration::from_secs(v * multiplier))
            .map_err(|_| BeemFlowError::validation(format!("invalid timeout value '{}'", timeout)))
    }

    /// Evaluate a conditional expression, which must use `{{ }}` template syntax.
    async fn evaluate_condition(&self, condition: &str, step_ctx: &StepContext) -> Result<bool> {
        let trimmed = condition.trim();
        if !trimmed.starts_with("{{") || !trimmed.ends_with("}}") {
            return Err(BeemFlowError::validation(format!(
                "condition must use template syntax: {{{{ expression }}}}, got: {}",
                condition
            )));
        }

        let template_data = step_ctx.template_data_with_runs(self.runs_data.clone());
        let value = self.templater.evaluate_expression(condition, &template_data)?;

        if let Some(b) = value.as_bool() {
            return Ok(b);
        }

        if let Some(s) = value.as_str() {
            match s.to_lowercase().as_str() {
                "true" => return Ok(true),
                "false" => return Ok(false),
                _ => {}
            }
        }

        if let Some(n) = value.as_f64() {
            return Ok(n != 0.0);
        }

        if value.is_array() {
            return Ok(!value.as_array().map(|a| a.is_empty()).unwrap_or(true));
        }
        if value.is_object() {
            return Ok(!value.as_object().map(|o| o.is_empty()).unwrap_or(true));
        }

        Ok(!value.is_null())
    }

    /// Resolve the adapter for a tool reference, and whether the special
    /// `__use` parameter must be injected for it. Exact registry names (the
    /// common case for registry-loaded HTTP tools) are tried first; `mcp://`
    /// and `core.` prefixes route to their dedicated adapters; anything else
    /// falls back to the generic HTTP adapter.
    fn resolve_adapter(&self, use_: &str) -> Result<(Arc<dyn Adapter>, bool)> {
        if let Some(adapter) = self.adapters.get(use_) {
            return Ok((adapter, false));
        }

        if use_.starts_with(constants::ADAPTER_PREFIX_MCP) {
            let adapter = self
                .adapters
                .get(constants::ADAPTER_ID_MCP)
                .ok_or_else(|| BeemFlowError::adapter("MCP adapter not registered"))?;
            return Ok((adapter, true));
        }

        if use_.starts_with(constants::ADAPTER_PREFIX_CORE) {
            let adapter = self
                .adapters
                .get(constants::ADAPTER_ID_CORE)
                .ok_or_else(|| BeemFlowError::adapter("core adapter not registered"))?;
            return Ok((adapter, true));
        }

        self.adapters
            .get(constants::HTTP_ADAPTER_ID)
            .map(|adapter| (adapter, false))
            .ok_or_else(|| {
                BeemFlowError::adapter(format!(
                    "adapter not found: {} (and HTTP adapter not available)",
                    use_
                ))
            })
    }

    /// Render every value in a `with` map against the current template data.
    fn render_map(
        templater: &Arc<Templater>,
        with: &HashMap<String, Value>,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        with.iter()
            .map(|(k, v)| Self::render_value(templater, v, data).map(|rendered| (k.clone(), rendered)))
            .collect()
    }

    /// Render a JSON value recursively (strings through the templater,
    /// arrays/objects element-wise, everything else passed through).
    fn render_value(templater: &Arc<Templater>, val: &Value, data: &HashMap<String, Value>) -> Result<Value> {
        match val {
            Value::String(s) => templater.render(s, data).map(Value::String),
            Value::Array(arr) => arr
                .iter()
                .map(|elem| Self::render_value(templater, elem, data))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| Self::render_value(templater, v, data).map(|rendered| (k.clone(), rendered)))
                .collect::<Result<serde_json::Map<String, Value>>>()
                .map(Value::Object),
            _ => Ok(val.clone()),
        }
    }

    /// Persist a step's execution record to storage.
    async fn persist_step_result(
        &self,
        step: &Step,
        step_ctx: &StepContext,
        run_id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
        status: StepStatus,
        error: Option<String>,
    ) -> Result<()> {
        let outputs = step_ctx
            .get_output(step.id.as_str())
            .and_then(|v| serde_json::from_value::<HashMap<String, Value>>(v).ok());

        let step_run = StepRun {
            id: Uuid::new_v4(),
            run_id,
            step_name: step.id.to_string(),
            status,
            started_at,
            ended_at: Some(chrono::Utc::now()),
            error,
            outputs,
        };

        self.storage.save_step(&step_run).await?;
        Ok(())
    }
}

#[cfg(test)]
mod executor_test;
