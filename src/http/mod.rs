//! HTTP server for BeemFlow
//!
//! Provides REST API for all BeemFlow operations with complete parity
//! with CLI and MCP interfaces.

pub mod response;

use crate::config::{Config, HttpConfig};
use crate::core::OperationRegistry;
use crate::{BeemFlowError, Result};
use axum::{
    Router,
    extract::{Json, Path as AxumPath},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Which interfaces a server process should expose.
///
/// `serve --http` and `serve --mcp` enable these independently; running with
/// neither flag falls back to the config file's `http.enableHttpApi` /
/// `http.enableMcp` defaults (see `cli::handle_serve_command`).
#[derive(Debug, Clone, Copy)]
pub struct ServerInterfaces {
    pub http_api: bool,
    pub mcp: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    registry: Arc<OperationRegistry>,
    storage: Arc<dyn crate::storage::Storage>,
}

/// Error type for HTTP handlers with enhanced error details
#[derive(Debug)]
pub struct AppError(BeemFlowError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self.0 {
            BeemFlowError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            BeemFlowError::Storage(e) => match e {
                crate::error::StorageError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "not_found",
                    format!("{} not found: {}", entity, id),
                ),
                _ => {
                    // Log full error details internally
                    tracing::error!("Storage error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "An internal storage error occurred".to_string(),
                    )
                }
            },
            BeemFlowError::StepExecution { step_id, message } => {
                // Log full error details internally
                tracing::error!("Step execution failed: {} - {}", step_id, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "execution_error",
                    "A step execution error occurred".to_string(),
                )
            }
            BeemFlowError::Adapter(msg) => (StatusCode::BAD_GATEWAY, "adapter_error", msg.clone()),
            BeemFlowError::Mcp(msg) => (StatusCode::BAD_GATEWAY, "mcp_error", msg.clone()),
            BeemFlowError::Network(e) => {
                // Log full error details internally
                tracing::error!("Network error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "network_error",
                    "A network error occurred".to_string(),
                )
            }
            _ => {
                // Log full error details internally
                tracing::error!("Internal error: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        // Log the sanitized error response
        tracing::debug!(
            error_type = error_type,
            status = %status,
            message = %message,
            "HTTP request error response"
        );

        let body = json!({
            "error": {
                "type": error_type,
                "message": message,
                "status": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<BeemFlowError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ============================================================================
// AUTO-GENERATED ROUTES - All operation routes are now generated from metadata
// ============================================================================
// The old handler macros are no longer needed - routes are auto-generated
// in build_operation_routes() from operation metadata

/// Start the HTTP server
pub async fn start_server(config: Config, interfaces: ServerInterfaces) -> Result<()> {
    // Initialize telemetry
    crate::telemetry::init(config.tracing.as_ref())?;

    let _ = interfaces;

    // Ensure HTTP config exists (use defaults if not provided)
    let http_config = config.http.as_ref().cloned().unwrap_or_else(|| HttpConfig {
        host: "127.0.0.1".to_string(),
        port: crate::constants::DEFAULT_HTTP_PORT,
        secure: false, // Default to false for local development
        allowed_origins: None,
        trust_proxy: false,
        enable_http_api: true,
        enable_mcp: true,
    });

    // Use centralized dependency creation from core module
    let dependencies = crate::core::create_dependencies(&config).await?;
    let storage = dependencies.storage.clone();
    let registry = Arc::new(OperationRegistry::new(dependencies));

    let state = AppState { registry, storage };

    // Build router with config for CORS
    // Note: All static assets are embedded in the binary - no file system access needed
    let app = build_router(state, &http_config);

    // Determine bind address
    let addr = format!("{}:{}", http_config.host, http_config.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| BeemFlowError::config(format!("Invalid address {}: {}", addr, e)))?;

    tracing::info!("Starting HTTP server on {}", socket_addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BeemFlowError::config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Auto-generate routes from operation metadata using macro-generated registration functions
fn build_operation_routes(state: &AppState) -> Router {
    let deps = state.registry.get_dependencies();

    // Use generated registration functions from each operation group
    // These functions call the http_route() method on each operation
    Router::new()
        .merge(crate::core::flows::flows::register_http_routes(
            deps.clone(),
        ))
        .merge(crate::core::runs::runs::register_http_routes(deps.clone()))
        .merge(crate::core::tools::tools::register_http_routes(
            deps.clone(),
        ))
        .merge(crate::core::mcp::mcp::register_http_routes(deps.clone()))
        .merge(crate::core::events::events::register_http_routes(
            deps.clone(),
        ))
        .merge(crate::core::system::system::register_http_routes(
            deps.clone(),
        ))
}

/// Build the `/cron` and `/cron/{workflow_name}` routes, closing over the
/// registry the same way the macro-generated operation routes do.
fn build_cron_routes(registry: Arc<OperationRegistry>) -> Router {
    let sweep_registry = registry.clone();
    let workflow_registry = registry;

    Router::new()
        .route(
            "/cron",
            post(move |headers: HeaderMap| {
                let registry = sweep_registry.clone();
                async move { cron_handler(registry, headers).await }
            }),
        )
        .route(
            "/cron/{workflow_name}",
            post(move |AxumPath(workflow_name): AxumPath<String>, headers: HeaderMap| {
                let registry = workflow_registry.clone();
                async move { cron_workflow_handler(registry, workflow_name, headers).await }
            }),
        )
}

/// Build the router with all endpoints
fn build_router(state: AppState, http_config: &HttpConfig) -> Router {
    // Build auto-generated operation routes from metadata
    let operation_routes = build_operation_routes(&state);
    let cron_routes = build_cron_routes(state.registry.clone());

    // Build application routes (system endpoints + operation routes)
    let app_routes = Router::new()
        // System endpoints (special handlers not in operation registry)
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Merge auto-generated and cron operation routes
        .merge(operation_routes)
        .merge(cron_routes);

    Router::new()
        .merge(app_routes)
        // Add comprehensive middleware stack
        .layer(
            ServiceBuilder::new()
                // Tracing layer for request/response logging
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(true))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                )
                // CORS layer for cross-origin requests (restrictive policy)
                .layer({
                    // Build allowed origins dynamically from config
                    let origin_localhost = format!("http://localhost:{}", http_config.port)
                        .parse::<axum::http::HeaderValue>()
                        .expect("valid header value");
                    let origin_127 = format!("http://127.0.0.1:{}", http_config.port)
                        .parse::<axum::http::HeaderValue>()
                        .expect("valid header value");

                    CorsLayer::new()
                        // Allow localhost origins based on configured port
                        .allow_origin([origin_localhost, origin_127])
                        // Only allow necessary HTTP methods
                        .allow_methods([
                            axum::http::Method::GET,
                            axum::http::Method::POST,
                            axum::http::Method::PUT,
                            axum::http::Method::PATCH,
                            axum::http::Method::DELETE,
                            axum::http::Method::OPTIONS,
                        ])
                        // Only allow necessary headers
                        .allow_headers([
                            axum::http::header::CONTENT_TYPE,
                            axum::http::header::AUTHORIZATION,
                            axum::http::header::HeaderName::from_static("x-requested-with"),
                        ])
                        .allow_credentials(true)
                }),
        )
}

// ============================================================================
// SYSTEM HANDLERS (Special cases not in operation registry)
// ============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> std::result::Result<(StatusCode, String), AppError> {
    let metrics = crate::telemetry::get_metrics()?;
    Ok((StatusCode::OK, metrics))
}

/// Checks the `Authorization` header against `CRON_SECRET` when that variable
/// is set. When `CRON_SECRET` is unset, cron triggers are unauthenticated
/// (suitable for local/dev use behind a trusted network boundary).
fn check_cron_secret(headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Ok(secret) = std::env::var("CRON_SECRET") else {
        return Ok(());
    };

    let expected = format!("Bearer {secret}");
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided == expected {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "type": "unauthorized",
                    "message": "missing or invalid cron secret",
                    "status": 401,
                }
            })),
        )
            .into_response())
    }
}

/// Trigger all workflows with a due `cron` schedule.
async fn cron_handler(
    registry: Arc<OperationRegistry>,
    headers: HeaderMap,
) -> std::result::Result<Response, Response> {
    check_cron_secret(&headers)?;

    let result = registry
        .execute("system_cron", json!({}))
        .await
        .map_err(|e| AppError::from(e).into_response())?;

    Ok(Json(result).into_response())
}

/// Trigger a single named workflow, bypassing the cron time window.
async fn cron_workflow_handler(
    registry: Arc<OperationRegistry>,
    workflow_name: String,
    headers: HeaderMap,
) -> std::result::Result<Response, Response> {
    check_cron_secret(&headers)?;

    let result = registry
        .execute("workflow_cron", json!({ "workflow": workflow_name }))
        .await
        .map_err(|e| AppError::from(e).into_response())?;

    Ok(Json(result).into_response())
}

#[cfg(test)]
mod response_test;
