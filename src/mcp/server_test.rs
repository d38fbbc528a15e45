use super::*;
use crate::core::OperationRegistry;
use crate::utils::TestEnvironment;

#[tokio::test]
async fn test_mcp_server_creation() {
    let env = TestEnvironment::new().await;
    let ops = Arc::new(OperationRegistry::new(env.deps));
    let server = McpServer::new(ops);

    let tools = server.get_tools_list();
    assert!(!tools.is_empty());
    assert!(tools.iter().any(|t| t.name == "beemflow_start_run"));
}

#[tokio::test]
async fn test_server_advertises_tools_capability() {
    let env = TestEnvironment::new().await;
    let ops = Arc::new(OperationRegistry::new(env.deps));
    let server = McpServer::new(ops);

    let info = server.get_info();
    assert!(info.capabilities.tools.is_some());
}

#[tokio::test]
async fn test_call_tool_unknown_operation() {
    let env = TestEnvironment::new().await;
    let ops = Arc::new(OperationRegistry::new(env.deps));
    let server = McpServer::new(ops);

    let result = server
        .operations
        .execute("nonexistent_operation", serde_json::json!({}))
        .await;
    assert!(result.is_err());
}
