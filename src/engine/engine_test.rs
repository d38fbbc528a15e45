use super::*;
use crate::model::{Flow, RetrySpec, Step, StepBody, Trigger};
use std::collections::HashMap;

fn echo_step(id: &str, text: &str) -> Step {
    let mut with = HashMap::new();
    with.insert("text".to_string(), serde_json::json!(text));
    Step {
        id: id.to_string().into(),
        body: StepBody::Exec {
            use_: "core.echo".to_string(),
            with,
        },
        ..Default::default()
    }
}

fn minimal_flow(name: &str, steps: Vec<Step>) -> Flow {
    Flow {
        name: name.to_string(),
        description: None,
        version: None,
        on: Some(Trigger::Single("cli.manual".to_string())),
        cron: None,
        vars: None,
        steps,
        catch: None,
        mcp_servers: None,
    }
}

#[tokio::test]
async fn test_engine_creation() {
    let engine = Engine::default();
    let adapters = engine.adapters.all();
    assert!(!adapters.is_empty());

    for adapter in adapters {
        println!("Registered adapter: {}", adapter.id());
    }
}

#[test]
fn test_default_registry_loading() {
    let data = include_str!("../registry/default.json");
    let entries: Vec<crate::registry::RegistryEntry> = serde_json::from_str(data).unwrap();

    println!("Total entries: {}", entries.len());

    let tools: Vec<_> = entries.iter().filter(|e| e.entry_type == "tool").collect();

    println!("Total tools: {}", tools.len());

    let http_fetch = entries.iter().find(|e| e.name == "http.fetch");
    assert!(http_fetch.is_some(), "http.fetch not found in registry");
    println!("Found http.fetch: {:?}", http_fetch.unwrap().name);
}

#[test]
fn test_adapter_registration() {
    let adapters = Arc::new(AdapterRegistry::new());
    let mcp_adapter = Arc::new(crate::adapter::McpAdapter::new());
    Engine::load_default_registry_tools(&adapters, &mcp_adapter);

    let all = adapters.all();
    println!("Total registered adapters: {}", all.len());
    for adapter in all.iter().take(15) {
        println!("  - {}", adapter.id());
    }

    let http_fetch = adapters.get("http.fetch");
    assert!(http_fetch.is_some(), "http.fetch should be registered");

    assert!(adapters.get("openai.chat_completion").is_some());
    assert!(adapters.get("google_sheets.values.get").is_some());
}

#[tokio::test]
async fn test_execute_minimal_valid_flow() {
    let engine = Engine::default();
    let flow = minimal_flow("test", vec![echo_step("s1", "hello")]);

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(
        result.is_ok(),
        "Minimal valid flow should execute successfully"
    );
}

#[tokio::test]
async fn test_execute_empty_steps() {
    let engine = Engine::default();
    let flow = minimal_flow("empty", vec![]);

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(result.is_ok(), "Flow with empty steps should succeed");
    assert_eq!(
        result.unwrap().outputs.len(),
        0,
        "Should return empty outputs"
    );
}

#[tokio::test]
async fn test_execute_with_event_data() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "event_test",
        vec![echo_step("echo_event", "Event: {{ event.name }}")],
    );

    let mut event = HashMap::new();
    event.insert("name".to_string(), serde_json::json!("TestEvent"));

    let result = engine.execute(&flow, event).await;
    assert!(result.is_ok(), "Flow with event data should succeed");
}

#[tokio::test]
async fn test_execute_with_vars() {
    let engine = Engine::default();
    let mut flow = minimal_flow(
        "vars_test",
        vec![echo_step(
            "echo_vars",
            "{{ vars.greeting }} {{ vars.name }}",
        )],
    );
    flow.vars = Some({
        let mut m = HashMap::new();
        m.insert("greeting".to_string(), serde_json::json!("Hello"));
        m.insert("name".to_string(), serde_json::json!("World"));
        m
    });

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(result.is_ok(), "Flow with vars should succeed");

    let outputs = result.unwrap();
    let echo_output = outputs.outputs.get("echo_vars").unwrap();
    let text = echo_output.get("text").unwrap().as_str().unwrap();
    assert_eq!(text, "Hello World", "Vars should be templated correctly");
}

#[tokio::test]
async fn test_execute_step_output_chaining() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "chaining_test",
        vec![
            echo_step("step1", "first output"),
            echo_step("step2", "Second: {{ step1.text }}"),
        ],
    );

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(result.is_ok(), "Output chaining should work");

    let outputs = result.unwrap();
    let step2_output = outputs.outputs.get("step2").unwrap();
    let text = step2_output.get("text").unwrap().as_str().unwrap();
    assert_eq!(
        text, "Second: first output",
        "Output chaining should template correctly"
    );
}

#[tokio::test]
async fn test_execute_concurrent_flows() {
    let engine = Arc::new(Engine::default());
    let flow = Arc::new(minimal_flow(
        "concurrent",
        vec![echo_step("s1", "concurrent")],
    ));

    let mut handles = vec![];
    for i in 0..5 {
        let engine_clone = engine.clone();
        let flow_clone = flow.clone();
        let handle = tokio::spawn(async move {
            let mut event = HashMap::new();
            event.insert("index".to_string(), serde_json::json!(i));
            engine_clone.execute(&flow_clone, event).await
        });
        handles.push(handle);
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "Concurrent execution should succeed");
    }
}

#[tokio::test]
async fn test_execute_catch_block() {
    let engine = Engine::default();
    let mut flow = minimal_flow(
        "catch_test",
        vec![Step {
            id: "fail".to_string().into(),
            body: StepBody::Exec {
                use_: "nonexistent.adapter".to_string(),
                with: HashMap::new(),
            },
            ..Default::default()
        }],
    );
    flow.catch = Some(vec![
        echo_step("catch1", "caught!"),
        echo_step("catch2", "second!"),
    ]);

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(
        result.is_ok(),
        "flow-level catch should recover the run since both catch steps succeed"
    );

    let outputs = result.unwrap().outputs;
    assert!(outputs.contains_key("catch1"));
    assert!(outputs.contains_key("catch2"));
}

#[tokio::test]
async fn test_flow_level_catch_sees_event_error() {
    let engine = Engine::default();
    let mut flow = minimal_flow(
        "retry_then_catch",
        vec![Step {
            id: "fail".to_string().into(),
            retry: Some(RetrySpec {
                attempts: 3,
                delay_sec: 0,
            }),
            body: StepBody::Exec {
                use_: "nonexistent.adapter".to_string(),
                with: HashMap::new(),
            },
            ..Default::default()
        }],
    );
    flow.catch = Some(vec![echo_step("recovered", "recovered: {{ event.error }}")]);

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(result.is_ok(), "flow-level catch should recover the run");

    let outputs = result.unwrap().outputs;
    let text = outputs
        .get("recovered")
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
        .unwrap();
    assert!(text.starts_with("recovered:"));
}

#[tokio::test]
async fn test_execute_secrets_injection() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "secrets_test",
        vec![echo_step("s1", "{{ secrets.MY_SECRET }}")],
    );

    let mut event = HashMap::new();
    event.insert(
        "secrets".to_string(),
        serde_json::json!({
            "MY_SECRET": "shhh"
        }),
    );

    let result = engine.execute(&flow, event).await;
    assert!(result.is_ok(), "Secrets injection should work");

    let outputs = result.unwrap();
    let s1_output = outputs.outputs.get("s1").unwrap();
    let text = s1_output.get("text").unwrap().as_str().unwrap();
    assert_eq!(text, "shhh", "Secret should be injected");
}

#[tokio::test]
async fn test_execute_secrets_dot_access() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "secrets_dot",
        vec![echo_step("s1", "Secret: {{ secrets.API_KEY }}")],
    );

    let mut event = HashMap::new();
    event.insert(
        "secrets".to_string(),
        serde_json::json!({
            "API_KEY": "secret123"
        }),
    );

    let result = engine.execute(&flow, event).await;
    assert!(result.is_ok(), "Secrets dot access should work");

    let outputs = result.unwrap();
    let text = outputs
        .outputs
        .get("s1")
        .unwrap()
        .get("text")
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(
        text, "Secret: secret123",
        "Secret should be accessible via dot notation"
    );
}

#[tokio::test]
async fn test_execute_array_access_in_template() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "array_access",
        vec![echo_step(
            "s1",
            "First: {{ event.arr[0].val }}, Second: {{ event.arr[1].val }}",
        )],
    );

    let mut event = HashMap::new();
    event.insert(
        "arr".to_string(),
        serde_json::json!([
            {"val": "a"},
            {"val": "b"}
        ]),
    );

    let result = engine.execute(&flow, event).await;
    assert!(result.is_ok(), "Array access should work");

    let outputs = result.unwrap();
    let text = outputs
        .outputs
        .get("s1")
        .unwrap()
        .get("text")
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(
        text, "First: a, Second: b",
        "Array access should work correctly"
    );
}

#[tokio::test]
async fn test_adapter_error_propagation() {
    let engine = Engine::default();
    let flow = minimal_flow(
        "adapter_error",
        vec![Step {
            id: "s1".to_string().into(),
            body: StepBody::Exec {
                use_: "core.echo".to_string(),
                with: HashMap::new(),
            },
            ..Default::default()
        }],
    );

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(result.is_ok(), "Should not error with empty with map");

    let outputs = result.unwrap();
    assert!(outputs.outputs.contains_key("s1"), "Should have s1 output");
}

#[tokio::test]
async fn test_environment_variables_in_templates() {
    unsafe {
        std::env::set_var("TEST_ENV_VAR", "test_value_123");
        std::env::set_var("BEEMFLOW_TEST_TOKEN", "secret_token_456");
    }

    let engine = Engine::default();
    let flow = minimal_flow(
        "env_test",
        vec![echo_step(
            "test_env",
            "Env var: {{ env.TEST_ENV_VAR }}, Token: {{ env.BEEMFLOW_TEST_TOKEN }}",
        )],
    );

    let result = engine.execute(&flow, HashMap::new()).await;
    assert!(
        result.is_ok(),
        "Environment variable templating should work"
    );

    let outputs = result.unwrap();
    let text = outputs
        .outputs
        .get("test_env")
        .unwrap()
        .get("text")
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(text, "Env var: test_value_123, Token: secret_token_456");

    unsafe {
        std::env::remove_var("TEST_ENV_VAR");
        std::env::remove_var("BEEMFLOW_TEST_TOKEN");
    }
}

#[test]
fn test_generate_deterministic_run_id() {
    let engine = Engine::default();
    let flow_name = "test-flow";
    let event: HashMap<String, serde_json::Value> = {
        let mut m = HashMap::new();
        m.insert("key1".to_string(), serde_json::json!("value1"));
        m.insert("key2".to_string(), serde_json::json!(42));
        m.insert("key3".to_string(), serde_json::json!(true));
        m
    };

    let id1 = engine.generate_deterministic_run_id(flow_name, &event);
    let id2 = engine.generate_deterministic_run_id(flow_name, &event);
    assert_eq!(id1, id2, "Same inputs should generate same UUID");

    let event2: HashMap<String, serde_json::Value> = {
        let mut m = HashMap::new();
        m.insert("key1".to_string(), serde_json::json!("value1"));
        m.insert("key2".to_string(), serde_json::json!(43));
        m.insert("key3".to_string(), serde_json::json!(true));
        m
    };
    let id3 = engine.generate_deterministic_run_id(flow_name, &event2);
    assert_ne!(
        id1, id3,
        "Different event values should generate different UUID"
    );

    let id4 = engine.generate_deterministic_run_id("different-flow", &event);
    assert_ne!(
        id1, id4,
        "Different flow name should generate different UUID"
    );

    let event_reordered: HashMap<String, serde_json::Value> = {
        let mut m = HashMap::new();
        m.insert("key3".to_string(), serde_json::json!(true));
        m.insert("key1".to_string(), serde_json::json!("value1"));
        m.insert("key2".to_string(), serde_json::json!(42));
        m
    };
    let id5 = engine.generate_deterministic_run_id(flow_name, &event_reordered);
    assert_eq!(id1, id5, "Key order should not affect UUID");

    assert_eq!(id1.get_version_num(), 5, "Should be UUID v5");

    let empty_event: HashMap<String, serde_json::Value> = HashMap::new();
    let id_empty = engine.generate_deterministic_run_id(flow_name, &empty_event);
    assert_ne!(
        id_empty,
        Uuid::nil(),
        "Empty event should not generate nil UUID"
    );

    let complex_event: HashMap<String, serde_json::Value> = {
        let mut m = HashMap::new();
        m.insert("nested".to_string(), serde_json::json!({"deep": "value"}));
        m.insert("array".to_string(), serde_json::json!([1, 2, 3]));
        m
    };
    let id_complex1 = engine.generate_deterministic_run_id(flow_name, &complex_event);
    let id_complex2 = engine.generate_deterministic_run_id(flow_name, &complex_event);
    assert_eq!(
        id_complex1, id_complex2,
        "Complex event should be deterministic"
    );
}

#[test]
fn test_generate_deterministic_run_id_time_window() {
    let engine = Engine::default();
    let flow_name = "test-flow";
    let event: HashMap<String, serde_json::Value> = {
        let mut m = HashMap::new();
        m.insert("key".to_string(), serde_json::json!("value"));
        m
    };

    let id1 = engine.generate_deterministic_run_id(flow_name, &event);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let id2 = engine.generate_deterministic_run_id(flow_name, &event);

    assert_eq!(id1, id2, "UUIDs within same minute should be identical");
}

#[tokio::test]
async fn test_await_event_resume_roundtrip() {
    let mut await_match = HashMap::new();
    await_match.insert("token".to_string(), serde_json::json!("{{ event.token }}"));

    let await_step = Step {
        id: "wait_for_resume".to_string().into(),
        body: StepBody::AwaitEvent {
            source: "resume-demo".to_string(),
            match_: await_match,
            timeout: None,
        },
        ..Default::default()
    };

    let flow = minimal_flow("await_resume_demo", vec![await_step]);

    let engine = Arc::new(Engine::default());

    let mut start_event = HashMap::new();
    start_event.insert("input".to_string(), serde_json::json!("hello world"));
    start_event.insert("token".to_string(), serde_json::json!("abc123"));

    let result = engine.execute(&flow, start_event).await;

    assert!(result.is_err(), "Should error/pause at await_event");
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("waiting for event") || err_msg.contains("paused"),
        "Error should indicate paused state, got: {}",
        err_msg
    );

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let mut resume_event = HashMap::new();
    resume_event.insert("resume_value".to_string(), serde_json::json!("it worked!"));
    resume_event.insert("token".to_string(), serde_json::json!("abc123"));

    engine
        .resume("abc123", resume_event.clone())
        .await
        .expect("Resume should succeed");

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_cancel_run_skips_remaining_steps() {
    let engine = Arc::new(Engine::default());
    let flow = Arc::new(minimal_flow(
        "cancel_test",
        vec![
            Step {
                id: "slow".to_string().into(),
                body: StepBody::Wait {
                    seconds: Some(30),
                    until: None,
                },
                ..Default::default()
            },
            echo_step("after", "should not run"),
        ],
    ));

    let engine_clone = engine.clone();
    let flow_clone = flow.clone();
    let run = tokio::spawn(async move { engine_clone.execute(&flow_clone, HashMap::new()).await });

    // Give the run a moment to reach the wait step, then cancel it.
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    let run_id = engine.generate_deterministic_run_id(&flow.name, &HashMap::new());
    engine.cancel_run(run_id).expect("run should be tracked while in-flight");

    let result = run.await.unwrap();
    assert!(result.is_err(), "cancelled run should fail");
    assert!(
        result.unwrap_err().to_string().contains("Cancelled"),
        "error should be a cancellation"
    );
}

#[test]
fn test_cancel_run_not_found() {
    let engine = Engine::default();
    let result = engine.cancel_run(Uuid::new_v4());
    assert!(result.is_err(), "cancelling an unknown run should error");
}
