//! MCP Server implementation
//!
//! Exposes BeemFlow operations as MCP tools for AI assistants (Claude Desktop, ChatGPT, etc.)
//! Uses the official `rmcp` SDK with auto-generation from operation metadata.

use crate::Result;
use crate::core::OperationRegistry;
use axum::Router;
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo, Tool, ToolsCapability,
    },
    service::{RequestContext, RoleServer, ServiceExt},
    transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
    },
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// MCP Server that exposes BeemFlow operations as tools
pub struct McpServer {
    operations: Arc<OperationRegistry>,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(operations: Arc<OperationRegistry>) -> Self {
        Self { operations }
    }

    /// Serve over stdio (for Claude Desktop, etc.)
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!("Starting MCP server on stdio using official rmcp SDK");

        let service = self
            .clone()
            .serve(rmcp::transport::io::stdio())
            .await
            .map_err(|e| {
                crate::BeemFlowError::internal(format!("Failed to start MCP server: {}", e))
            })?;

        service
            .waiting()
            .await
            .map_err(|e| crate::BeemFlowError::internal(format!("MCP server error: {}", e)))?;

        tracing::info!("MCP server shutdown");
        Ok(())
    }

    /// Serves the MCP server over Streamable HTTP.
    ///
    /// Uses the MCP 2025-03-26 Streamable HTTP transport specification, which replaces
    /// the deprecated HTTP+SSE transport from protocol version 2024-11-05.
    ///
    /// # Endpoints
    /// - `POST/GET/DELETE /mcp` - Unified MCP endpoint (Streamable HTTP)
    ///
    /// # Example
    /// ```no_run
    /// # use beemflow::mcp::McpServer;
    /// # use beemflow::core::OperationRegistry;
    /// # use beemflow::utils::TestEnvironment;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() -> beemflow::Result<()> {
    /// # let env = TestEnvironment::new().await;
    /// # let ops = Arc::new(OperationRegistry::new(env.deps.clone()));
    /// # let server = McpServer::new(ops);
    /// server.serve_http("127.0.0.1", 3001).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn serve_http(&self, host: &str, port: u16) -> Result<()> {
        tracing::info!("Starting MCP server (Streamable HTTP) on {}:{}", host, port);

        let addr: std::net::SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| crate::BeemFlowError::config(format!("Invalid address: {}", e)))?;

        let streamable_service = create_streamable_service(self.clone());

        let app = Router::new().route(
            "/mcp",
            axum::routing::any(move |req| async move {
                streamable_service.clone().handle(req).await
            }),
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| crate::BeemFlowError::config(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("MCP Streamable HTTP server running on http://{}", addr);
        tracing::info!("   Unified endpoint: http://{}/mcp (POST/GET/DELETE)", addr);
        tracing::info!("   Transport: MCP 2025-03-26 Streamable HTTP (replaces deprecated SSE)");

        axum::serve(listener, app)
            .await
            .map_err(|e| crate::BeemFlowError::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Auto-generate MCP tools from operation metadata using generated registration functions
    fn get_tools_list(&self) -> Vec<Tool> {
        let deps = self.operations.get_dependencies();

        // Call generated registration functions from each operation group
        let mut tools: Vec<Tool> = [
            crate::core::flows::flows::register_mcp_tools,
            crate::core::runs::runs::register_mcp_tools,
            crate::core::tools::tools::register_mcp_tools,
            crate::core::mcp::mcp::register_mcp_tools,
            crate::core::system::system::register_mcp_tools,
        ]
        .into_iter()
        .flat_map(|register_fn| register_fn(deps.clone()))
        .collect();

        // Sort tools by name for consistent output
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            "Auto-generated {} MCP tools from operation metadata",
            tools.len()
        );
        tools
    }
}

impl Clone for McpServer {
    fn clone(&self) -> Self {
        Self {
            operations: Arc::clone(&self.operations),
        }
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        let tools = self.get_tools_list();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_name = request.name.as_ref();
        let arguments_map = request.arguments.clone().unwrap_or_default();
        let arguments = Value::Object(arguments_map);

        tracing::debug!("Calling tool: {} with args: {:?}", tool_name, arguments);

        // Strip "beemflow_" prefix to get the actual operation name
        let operation_name = tool_name.strip_prefix("beemflow_").unwrap_or(tool_name);

        // Execute operation via registry
        match self.operations.execute(operation_name, arguments).await {
            Ok(result) => {
                let result_text =
                    serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string());

                Ok(CallToolResult::success(vec![Content::text(result_text)]))
            }
            Err(e) => {
                let error_msg = format!("Tool execution failed: {}", e);
                tracing::error!("{}", error_msg);

                Ok(CallToolResult::error(vec![Content::text(error_msg)]))
            }
        }
    }
}

#[cfg(test)]
mod server_test;

/// Create StreamableHttpService from McpServer
fn create_streamable_service(
    mcp_server: McpServer,
) -> StreamableHttpService<McpServer, LocalSessionManager> {
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        stateful_mode: true,
    };

    StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    )
}
