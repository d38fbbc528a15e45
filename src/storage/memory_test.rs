use super::*;
use crate::storage::{MemoryStorage, Run, RunStatus};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

#[tokio::test]
async fn test_save_and_get_run() {
    let storage = MemoryStorage::new();
    let run = Run {
        id: Uuid::new_v4(),
        flow_name: "test".to_string(),
        event: HashMap::new(),
        vars: HashMap::new(),
        status: RunStatus::Running,
        started_at: Utc::now(),
        ended_at: None,
        steps: None,
    };

    storage.save_run(&run).await.unwrap();
    let retrieved = storage.get_run(run.id).await.unwrap();
    assert!(retrieved.is_some());
    assert_eq!(retrieved.unwrap().flow_name, "test");
}

#[tokio::test]
async fn test_delete_run() {
    let storage = MemoryStorage::new();
    let run_id = Uuid::new_v4();
    let run = Run {
        id: run_id,
        flow_name: "test".to_string(),
        event: HashMap::new(),
        vars: HashMap::new(),
        status: RunStatus::Running,
        started_at: Utc::now(),
        ended_at: None,
        steps: None,
    };

    storage.save_run(&run).await.unwrap();
    storage.delete_run(run_id).await.unwrap();
    let retrieved = storage.get_run(run_id).await.unwrap();
    assert!(retrieved.is_none());
}

#[tokio::test]
async fn test_paused_runs() {
    let storage = MemoryStorage::new();
    let token = "test_token";
    let data = serde_json::json!({"foo": "bar"});

    storage
        .save_paused_run(token, "my.topic", data.clone())
        .await
        .unwrap();
    let loaded = storage.load_paused_runs().await.unwrap();
    assert_eq!(loaded.get(token), Some(&data));

    let by_source = storage.find_paused_runs_by_source("my.topic").await.unwrap();
    assert_eq!(by_source, vec![(token.to_string(), data)]);

    storage.delete_paused_run(token).await.unwrap();
    let loaded = storage.load_paused_runs().await.unwrap();
    assert!(!loaded.contains_key(token));
}

#[tokio::test]
async fn test_fetch_and_delete_paused_run() {
    let storage = MemoryStorage::new();
    let data = serde_json::json!({"foo": "bar"});
    storage
        .save_paused_run("tok", "src", data.clone())
        .await
        .unwrap();

    let fetched = storage.fetch_and_delete_paused_run("tok").await.unwrap();
    assert_eq!(fetched, Some(data));

    let fetched_again = storage.fetch_and_delete_paused_run("tok").await.unwrap();
    assert_eq!(fetched_again, None);
}

#[tokio::test]
async fn test_draft_flows() {
    let storage = MemoryStorage::new();
    storage
        .save_flow("my_flow", "name: my_flow\nsteps: []", None)
        .await
        .unwrap();

    let content = storage.get_flow("my_flow").await.unwrap();
    assert_eq!(content, Some("name: my_flow\nsteps: []".to_string()));

    let names = storage.list_flows().await.unwrap();
    assert_eq!(names, vec!["my_flow".to_string()]);

    storage.delete_flow("my_flow").await.unwrap();
    assert_eq!(storage.get_flow("my_flow").await.unwrap(), None);
}

#[tokio::test]
async fn test_flow_versioning() {
    let storage = MemoryStorage::new();

    storage
        .deploy_flow_version("my_flow", "v1", "content1")
        .await
        .unwrap();
    storage
        .deploy_flow_version("my_flow", "v2", "content2")
        .await
        .unwrap();
    storage.set_deployed_version("my_flow", "v2").await.unwrap();

    let deployed = storage.get_deployed_version("my_flow").await.unwrap();
    assert_eq!(deployed, Some("v2".to_string()));

    let versions = storage.list_flow_versions("my_flow").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().any(|v| v.version == "v2" && v.is_live));

    let history = storage
        .get_latest_deployed_version_from_history("my_flow")
        .await
        .unwrap();
    assert_eq!(history, Some("v2".to_string()));

    storage.unset_deployed_version("my_flow").await.unwrap();
    assert_eq!(storage.get_deployed_version("my_flow").await.unwrap(), None);
}

#[tokio::test]
async fn test_find_flow_names_by_topic() {
    let storage = MemoryStorage::new();
    let content = "name: on_order\non: order.created\nsteps: []";
    storage
        .deploy_flow_version("on_order", "v1", content)
        .await
        .unwrap();

    let names = storage
        .find_flow_names_by_topic("order.created")
        .await
        .unwrap();
    assert_eq!(names, vec!["on_order".to_string()]);

    let none = storage
        .find_flow_names_by_topic("no.such.topic")
        .await
        .unwrap();
    assert!(none.is_empty());
}
