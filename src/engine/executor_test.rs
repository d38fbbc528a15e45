use super::*;
use crate::adapter::{AdapterRegistry, CoreAdapter};
use crate::dsl::Templater;
use crate::event::EventBus;
use crate::model::{RetrySpec, Step, StepBody};
use crate::storage::Storage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn setup_executor() -> Executor {
    let adapters = Arc::new(AdapterRegistry::new());
    adapters.register(Arc::new(CoreAdapter::new()));
    let templater = Arc::new(Templater::new());
    let event_bus: Arc<dyn EventBus> = Arc::new(crate::event::InProcEventBus::new());
    let storage: Arc<dyn Storage> = Arc::new(crate::storage::MemoryStorage::new());

    Executor::new(
        adapters,
        templater,
        event_bus,
        storage,
        None,
        1000,
        tokio_util::sync::CancellationToken::new(),
        uuid::Uuid::new_v4(),
    )
}

fn exec_step(id: &str, use_: &str, with: HashMap<String, Value>) -> Step {
    Step {
        id: id.to_string().into(),
        body: StepBody::Exec {
            use_: use_.to_string(),
            with,
        },
        ..Default::default()
    }
}

fn with_text(text: &str) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("text".to_string(), Value::String(text.to_string()));
    map
}

#[tokio::test]
async fn test_evaluate_condition() {
    let executor = setup_executor();

    let mut vars = HashMap::new();
    vars.insert("status".to_string(), Value::String("active".to_string()));
    let step_ctx = StepContext::new(HashMap::new(), vars, HashMap::new());

    let result = executor
        .evaluate_condition("{{ status == 'active' }}", &step_ctx)
        .await
        .unwrap();
    assert!(result);
}

#[tokio::test]
async fn test_parallel_block_execution() {
    let executor = setup_executor();
    let step_ctx = StepContext::new(HashMap::new(), HashMap::new(), HashMap::new());

    let steps = vec![
        exec_step("task1", "core.echo", with_text("Task 1")),
        exec_step("task2", "core.echo", with_text("Task 2")),
    ];

    let result = executor
        .execute_parallel_block(&steps, &step_ctx, "parallel_test")
        .await;
    assert!(result.is_ok());

    assert!(step_ctx.get_output("task1").is_some());
    assert!(step_ctx.get_output("task2").is_some());
}

#[tokio::test]
async fn test_parallel_block_with_error() {
    let executor = setup_executor();
    let step_ctx = StepContext::new(HashMap::new(), HashMap::new(), HashMap::new());

    let steps = vec![
        exec_step("good_task", "core.echo", with_text("Good")),
        exec_step("bad_task", "nonexistent.adapter", HashMap::new()),
    ];

    let result = executor
        .execute_parallel_block(&steps, &step_ctx, "parallel_error")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_foreach_sequential() {
    let executor = setup_executor();

    let mut vars = HashMap::new();
    vars.insert(
        "items".to_string(),
        Value::Array(vec![
            Value::String("alpha".to_string()),
            Value::String("beta".to_string()),
            Value::String("gamma".to_string()),
        ]),
    );
    let step_ctx = StepContext::new(HashMap::new(), vars, HashMap::new());

    let inner = vec![exec_step(
        "process",
        "core.echo",
        with_text("Processing {{ item }}"),
    )];

    let result = executor
        .execute_foreach_block(
            "{{ vars.items }}",
            "item",
            &inner,
            true,
            &step_ctx,
            "foreach_seq",
        )
        .await;
    if let Err(ref e) = result {
        eprintln!("foreach_sequential error: {}", e);
    }
    assert!(result.is_ok());

    let output = step_ctx.get_output("foreach_seq").unwrap();
    assert_eq!(output.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_foreach_concurrent_preserves_order() {
    let executor = setup_executor();

    let mut vars = HashMap::new();
    vars.insert(
        "items".to_string(),
        Value::Array(vec![
            Value::String("alpha".to_string()),
            Value::String("beta".to_string()),
            Value::String("gamma".to_string()),
        ]),
    );
    let step_ctx = StepContext::new(HashMap::new(), vars, HashMap::new());

    let inner = vec![exec_step(
        "process",
        "core.echo",
        with_text("{{ item }}"),
    )];

    let result = executor
        .execute_foreach_block(
            "{{ vars.items }}",
            "item",
            &inner,
            false,
            &step_ctx,
            "foreach_conc",
        )
        .await;
    assert!(result.is_ok());

    let output = step_ctx.get_output("foreach_conc").unwrap();
    let iterations = output.as_array().unwrap();
    assert_eq!(iterations.len(), 3);
    let expected = ["alpha", "beta", "gamma"];
    for (iteration, want) in iterations.iter().zip(expected) {
        let got = iteration
            .get("process")
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        assert!(
            got.contains(want),
            "iteration output {:?} should contain {}",
            iteration,
            want
        );
    }
}

#[tokio::test]
async fn test_foreach_empty_list() {
    let executor = setup_executor();

    let mut vars = HashMap::new();
    vars.insert("items".to_string(), Value::Array(vec![]));
    let step_ctx = StepContext::new(HashMap::new(), vars, HashMap::new());

    let inner = vec![exec_step("process", "core.echo", HashMap::new())];

    let result = executor
        .execute_foreach_block(
            "{{ vars.items }}",
            "item",
            &inner,
            false,
            &step_ctx,
            "foreach_empty",
        )
        .await;
    assert!(result.is_ok());

    let output = step_ctx.get_output("foreach_empty").unwrap();
    assert!(output.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_logic() {
    let executor = setup_executor();

    let step = Step {
        id: "retry_test".to_string().into(),
        retry: Some(RetrySpec {
            attempts: 3,
            delay_sec: 0,
        }),
        body: StepBody::Exec {
            use_: "nonexistent.adapter".to_string(),
            with: HashMap::new(),
        },
        ..Default::default()
    };

    let step_ctx = StepContext::new(HashMap::new(), HashMap::new(), HashMap::new());
    let result = executor
        .execute_single_step(&step, &step_ctx, "retry_test")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_inline_catch_recovers_after_retry_exhaustion() {
    let executor = setup_executor();

    let step = Step {
        id: "flaky".to_string().into(),
        retry: Some(RetrySpec {
            attempts: 2,
            delay_sec: 0,
        }),
        catch: Some(vec![exec_step(
            "recover",
            "core.echo",
            with_text("recovered: {{ event.error }}"),
        )]),
        body: StepBody::Exec {
            use_: "nonexistent.adapter".to_string(),
            with: HashMap::new(),
        },
        ..Default::default()
    };

    let step_ctx = StepContext::new(HashMap::new(), HashMap::new(), HashMap::new());
    let result = executor
        .execute_single_step(&step, &step_ctx, "flaky")
        .await;
    assert!(result.is_ok(), "inline catch should recover the step");

    let output = step_ctx.get_output("recover").unwrap();
    let text = output.get("text").and_then(|v| v.as_str()).unwrap();
    assert!(text.starts_with("recovered:"));
}

#[tokio::test]
async fn test_conditional_skip() {
    let executor = setup_executor();

    let mut vars = HashMap::new();
    vars.insert("enabled".to_string(), Value::Bool(false));
    let step_ctx = StepContext::new(HashMap::new(), vars, HashMap::new());

    let step = Step {
        id: "conditional_step".to_string().into(),
        if_: Some("{{ enabled }}".to_string()),
        body: StepBody::Exec {
            use_: "core.echo".to_string(),
            with: with_text("Should not execute"),
        },
        ..Default::default()
    };

    let result = executor
        .execute_single_step(&step, &step_ctx, "conditional_step")
        .await;
    assert!(result.is_ok());

    assert!(step_ctx.get_output("conditional_step").is_none());
}

#[tokio::test]
async fn test_wait_seconds() {
    let executor = setup_executor();

    let start = std::time::Instant::now();
    let result = executor.execute_wait(Some(1), None, &StepContext::new(
        HashMap::new(),
        HashMap::new(),
        HashMap::new(),
    )).await;
    assert!(result.is_ok());
    let duration = start.elapsed();

    assert!(duration.as_secs() >= 1);
}

#[tokio::test]
async fn test_wait_cancelled_wakes_early() {
    let executor = setup_executor();
    executor.cancel.cancel();

    let start = std::time::Instant::now();
    let result = executor
        .execute_wait(
            Some(30),
            None,
            &StepContext::new(HashMap::new(), HashMap::new(), HashMap::new()),
        )
        .await;

    assert!(matches!(result, Err(BeemFlowError::Cancelled(_))));
    assert!(start.elapsed().as_secs() < 5);
}

#[tokio::test]
async fn test_cancelled_run_skips_remaining_steps() {
    let adapters = Arc::new(AdapterRegistry::new());
    adapters.register(Arc::new(CoreAdapter::new()));
    let templater = Arc::new(Templater::new());
    let event_bus: Arc<dyn EventBus> = Arc::new(crate::event::InProcEventBus::new());
    let storage: Arc<dyn Storage> = Arc::new(crate::storage::MemoryStorage::new());
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let run_id = uuid::Uuid::new_v4();
    let executor = Executor::new(
        adapters, templater, event_bus, storage, None, 1000, cancel, run_id,
    );

    let flow = Flow {
        name: "cancel-test".to_string(),
        steps: vec![exec_step(
            "greet",
            "core.echo",
            HashMap::from([("text".to_string(), Value::String("hi".to_string()))]),
        )],
        ..Default::default()
    };

    let step_ctx = StepContext::new(HashMap::new(), HashMap::new(), HashMap::new());
    let result = executor.execute_steps(&flow, &step_ctx, 0, run_id).await;

    assert!(matches!(result, Err(BeemFlowError::Cancelled(_))));
    assert!(step_ctx.get_output("greet").is_none());
}
