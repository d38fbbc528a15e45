//! Core data models for BeemFlow
//!
//! This module contains all the data structures that define BeemFlow workflows,
//! runs, steps, and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Name of a flow. Distinct from other string-shaped identifiers so a run id
/// or resume token can never be passed where a flow name is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowName(pub String);

impl fmt::Display for FlowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FlowName {
    fn from(s: String) -> Self {
        FlowName(s)
    }
}

impl From<&str> for FlowName {
    fn from(s: &str) -> Self {
        FlowName(s.to_string())
    }
}

impl std::ops::Deref for FlowName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a single step within a flow, unique across every nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        StepId(s)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        StepId(s.to_string())
    }
}

impl std::ops::Deref for StepId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl StepId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier of one execution of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(u: Uuid) -> Self {
        RunId(u)
    }
}

/// Opaque, collision-resistant token bound to a paused-run snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(pub String);

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ResumeToken {
    pub fn new() -> Self {
        ResumeToken(Uuid::new_v4().to_string())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ResumeToken {
    fn from(s: String) -> Self {
        ResumeToken(s)
    }
}

impl From<&str> for ResumeToken {
    fn from(s: &str) -> Self {
        ResumeToken(s.to_string())
    }
}

/// A complete workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flow {
    /// Unique workflow identifier (REQUIRED)
    pub name: String,

    /// Human-readable description (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Semantic version (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Trigger descriptor (optional for testing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<Trigger>,

    /// Cron expression (required if on: schedule.cron)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Workflow-level variables (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<HashMap<String, serde_json::Value>>,

    /// Array of execution steps (REQUIRED)
    pub steps: Vec<Step>,

    /// Error handling steps (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<Step>>,

    /// MCP server configurations (optional)
    #[serde(skip_serializing_if = "Option::is_none", rename = "mcpServers")]
    pub mcp_servers: Option<HashMap<String, McpServerConfig>>,
}

/// Trigger descriptor for workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single trigger type as string (e.g. `"cli.manual"`)
    Single(String),
    /// Multiple trigger types as array of strings
    Multiple(Vec<String>),
    /// Complex trigger entries, e.g. `[{event: "topic"}]` normalized to objects
    Complex(Vec<HashMap<String, serde_json::Value>>),
    /// Raw value for maximum flexibility (accepts any valid JSON)
    Raw(serde_json::Value),
}

impl Trigger {
    /// Check if this trigger includes a specific type
    pub fn includes(&self, trigger_type: &str) -> bool {
        match self {
            Trigger::Single(t) => t == trigger_type,
            Trigger::Multiple(triggers) => triggers.iter().any(|t| t == trigger_type),
            Trigger::Complex(entries) => entries.iter().any(|entry| {
                entry.keys().any(|k| k == trigger_type)
                    || entry
                        .values()
                        .any(|v| v.as_str() == Some(trigger_type))
            }),
            Trigger::Raw(value) => match value {
                serde_json::Value::String(s) => s == trigger_type,
                serde_json::Value::Array(items) => items
                    .iter()
                    .any(|v| v.as_str() == Some(trigger_type)),
                serde_json::Value::Object(map) => map.contains_key(trigger_type),
                _ => false,
            },
        }
    }
}

/// Wire-format representation of a step before it is resolved into the
/// tagged `Step`/`StepBody` pair. The document loader's normalization pass
/// (§4.1) is responsible for producing exactly one of `exec`/`parallel`/
/// `foreach`/`await_event`/`wait` per step before this is deserialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawStep {
    id: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "if")]
    if_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    retry: Option<RetrySpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    catch: Option<Vec<Step>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    exec: Option<ExecBody>,

    #[serde(skip_serializing_if = "Option::is_none")]
    parallel: Option<ParallelBody>,

    #[serde(skip_serializing_if = "Option::is_none")]
    foreach: Option<ForeachBody>,

    #[serde(skip_serializing_if = "Option::is_none")]
    await_event: Option<AwaitEventBody>,

    #[serde(skip_serializing_if = "Option::is_none")]
    wait: Option<WaitBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecBody {
    #[serde(rename = "use")]
    use_: String,
    #[serde(default)]
    with: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParallelBody {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForeachBody {
    list_expr: String,
    #[serde(rename = "as")]
    alias: String,
    #[serde(rename = "do")]
    steps: Vec<Step>,
    /// Opt-in to running iterations one at a time; default is concurrent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    sequential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AwaitEventBody {
    source: String,
    #[serde(rename = "match")]
    match_: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WaitBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    until: Option<String>,
}

/// A single workflow step: a tagged variant over the five kinds the engine
/// schedules. Common attributes (id, condition, dependencies, retry, catch)
/// live on `Step`; variant-specific attributes live on `StepBody`.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    pub if_: Option<String>,
    pub depends_on: Option<Vec<StepId>>,
    pub retry: Option<RetrySpec>,
    pub catch: Option<Vec<Step>>,
    pub body: StepBody,
}

#[derive(Debug, Clone)]
pub enum StepBody {
    /// Invokes a single tool reference with a rendered input map.
    Exec {
        use_: String,
        with: HashMap<String, serde_json::Value>,
    },
    /// Executes nested steps concurrently; succeeds iff every child succeeds.
    Parallel { steps: Vec<Step> },
    /// Evaluates a list expression and executes nested steps once per element.
    Foreach {
        list_expr: String,
        alias: String,
        steps: Vec<Step>,
        /// Iterations run concurrently unless this is set.
        sequential: bool,
    },
    /// Pauses until a matching event arrives on the named source.
    AwaitEvent {
        source: String,
        match_: HashMap<String, serde_json::Value>,
        timeout: Option<String>,
    },
    /// Sleeps for a fixed duration or until an absolute timestamp.
    Wait {
        seconds: Option<u64>,
        until: Option<String>,
    },
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let present = [
            raw.exec.is_some(),
            raw.parallel.is_some(),
            raw.foreach.is_some(),
            raw.await_event.is_some(),
            raw.wait.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        if present != 1 {
            return Err(format!(
                "step '{}' must declare exactly one of exec/parallel/foreach/await_event/wait (found {})",
                raw.id, present
            ));
        }

        let body = if let Some(exec) = raw.exec {
            StepBody::Exec {
                use_: exec.use_,
                with: exec.with,
            }
        } else if let Some(parallel) = raw.parallel {
            StepBody::Parallel {
                steps: parallel.steps,
            }
        } else if let Some(foreach) = raw.foreach {
            StepBody::Foreach {
                list_expr: foreach.list_expr,
                alias: foreach.alias,
                steps: foreach.steps,
                sequential: foreach.sequential,
            }
        } else if let Some(await_event) = raw.await_event {
            StepBody::AwaitEvent {
                source: await_event.source,
                match_: await_event.match_,
                timeout: await_event.timeout,
            }
        } else {
            let wait = raw.wait.expect("checked above");
            StepBody::Wait {
                seconds: wait.seconds,
                until: wait.until,
            }
        };

        Ok(Step {
            id: StepId(raw.id),
            if_: raw.if_,
            depends_on: raw.depends_on.map(|v| v.into_iter().map(StepId).collect()),
            retry: raw.retry,
            catch: raw.catch,
            body,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let mut raw = RawStep {
            id: step.id.0,
            if_: step.if_,
            depends_on: step
                .depends_on
                .map(|v| v.into_iter().map(|s| s.0).collect()),
            retry: step.retry,
            catch: step.catch,
            ..Default::default()
        };

        match step.body {
            StepBody::Exec { use_, with } => raw.exec = Some(ExecBody { use_, with }),
            StepBody::Parallel { steps } => raw.parallel = Some(ParallelBody { steps }),
            StepBody::Foreach {
                list_expr,
                alias,
                steps,
                sequential,
            } => {
                raw.foreach = Some(ForeachBody {
                    list_expr,
                    alias,
                    steps,
                    sequential,
                })
            }
            StepBody::AwaitEvent {
                source,
                match_,
                timeout,
            } => {
                raw.await_event = Some(AwaitEventBody {
                    source,
                    match_,
                    timeout,
                })
            }
            StepBody::Wait { seconds, until } => raw.wait = Some(WaitBody { seconds, until }),
        }

        raw
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawStep::deserialize(deserializer)?;
        Step::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Step {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let raw: RawStep = self.clone().into();
        raw.serialize(serializer)
    }
}

impl Default for Step {
    fn default() -> Self {
        Step {
            id: StepId(String::new()),
            if_: None,
            depends_on: None,
            retry: None,
            catch: None,
            body: StepBody::Exec {
                use_: String::new(),
                with: HashMap::new(),
            },
        }
    }
}

/// Retry configuration for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Total attempts (including first)
    pub attempts: u32,

    /// Delay between attempts in seconds
    pub delay_sec: u64,
}

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to execute
    pub command: String,

    /// Command arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Server port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Transport protocol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,

    /// Server endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A workflow run instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier
    pub id: Uuid,

    /// Flow name
    pub flow_name: String,

    /// Event data that triggered this run
    pub event: HashMap<String, serde_json::Value>,

    /// Flow variables
    pub vars: HashMap<String, serde_json::Value>,

    /// Current run status
    pub status: RunStatus,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp (if completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Step execution records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepRun>>,
}

/// Run execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is pending execution
    Pending,

    /// Run is currently executing
    Running,

    /// Run completed successfully
    Succeeded,

    /// Run failed with error
    Failed,

    /// Run is waiting for external event
    Waiting,

    /// Run was skipped (duplicate)
    Skipped,
}

/// A single step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    /// Unique step run identifier
    pub id: Uuid,

    /// Parent run identifier
    pub run_id: Uuid,

    /// Step name/ID
    pub step_name: String,

    /// Step execution status
    pub status: StepStatus,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp (if completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Step outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, serde_json::Value>>,
}

/// Step execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step is pending execution
    Pending,

    /// Step is currently executing
    Running,

    /// Step completed successfully
    Succeeded,

    /// Step failed with error
    Failed,

    /// Step is waiting for external event
    Waiting,

    /// Step was skipped (conditional)
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_exec_round_trips_through_shorthand_shape() {
        let json = serde_json::json!({
            "id": "greet",
            "exec": {"use": "core.echo", "with": {"text": "hi"}}
        });
        let step: Step = serde_json::from_value(json).unwrap();
        match &step.body {
            StepBody::Exec { use_, with } => {
                assert_eq!(use_, "core.echo");
                assert_eq!(with.get("text").unwrap(), "hi");
            }
            _ => panic!("expected exec step"),
        }
        assert_eq!(step.id.0, "greet");
    }

    #[test]
    fn step_requires_exactly_one_body() {
        let json = serde_json::json!({"id": "bad"});
        let err = serde_json::from_value::<Step>(json).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn trigger_single_includes() {
        let t = Trigger::Single("cli.manual".to_string());
        assert!(t.includes("cli.manual"));
        assert!(!t.includes("schedule.cron"));
    }
}
