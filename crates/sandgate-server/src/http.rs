//! HTTP transport for the sandbox API.
//!
//! ## Endpoints
//!
//! - `POST /v1/sandboxes` - Create a sandbox and wait until it is ready (201)
//! - `GET /v1/sandboxes/:id` - Describe a sandbox
//! - `GET /v1/sandboxes/:id/endpoints/:port` - Resolve an address for a port
//! - `POST /v1/sandboxes/:id/pause` - Request a pause (202)
//! - `POST /v1/sandboxes/:id/resume` - Request a resume (202)
//! - `GET /health` - Health check, no API key required
//!
//! Every `/v1` route requires the `SANDGATE-API-KEY` header. Authentication
//! runs before any path or body parsing.

use crate::config::API_KEY_HEADER;
use crate::error::ApiError;
use crate::server::SandgateServer;
use crate::types::{EndpointQuery, HealthResponse};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use sandgate_core::{Caller, CreateSandboxRequest, Endpoint, Sandbox, SandboxId};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(server: SandgateServer) -> Router {
    tracing::debug!("Building HTTP router");

    let api = Router::new()
        .route("/v1/sandboxes", post(create_sandbox))
        .route("/v1/sandboxes/:id", get(describe_sandbox))
        .route("/v1/sandboxes/:id/endpoints/:port", get(get_endpoint))
        .route("/v1/sandboxes/:id/pause", post(pause_sandbox))
        .route("/v1/sandboxes/:id/resume", post(resume_sandbox))
        .route_layer(middleware::from_fn_with_state(
            server.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(server)
}

/// Resolve the API key into a [`Caller`] for the handlers.
async fn auth_middleware(
    State(server): State<SandgateServer>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let caller = server.controller().authenticate(key.as_deref()).await?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(HealthResponse::healthy())
}

async fn create_sandbox(
    State(server): State<SandgateServer>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<CreateSandboxRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Sandbox>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let sandbox = server.create(caller, request).await?;
    Ok((StatusCode::CREATED, Json(sandbox)))
}

async fn describe_sandbox(
    State(server): State<SandgateServer>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Sandbox>, ApiError> {
    let sandbox = server
        .controller()
        .describe(&caller, &SandboxId::from(id))
        .await?;
    Ok(Json(sandbox))
}

async fn get_endpoint(
    State(server): State<SandgateServer>,
    Extension(caller): Extension<Caller>,
    Path((id, port)): Path<(String, String)>,
    query: Result<Query<EndpointQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Endpoint>, ApiError> {
    let port = parse_port(&port)?;
    let Query(query) = query.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let route = server.endpoint_route(query.use_server_proxy, host)?;

    let endpoint = server
        .controller()
        .get_endpoint(&caller, &SandboxId::from(id), port, &route)
        .await?;
    Ok(Json(endpoint))
}

async fn pause_sandbox(
    State(server): State<SandgateServer>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    server
        .controller()
        .pause(&caller, &SandboxId::from(id))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_sandbox(
    State(server): State<SandgateServer>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    server
        .controller()
        .resume(&caller, &SandboxId::from(id))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Parse a port path segment, rejecting anything outside `1..=65535`.
fn parse_port(raw: &str) -> Result<u16, ApiError> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ApiError::invalid_request(format!(
            "port must be an integer in 1..=65535, got {raw:?}"
        ))),
    }
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    server: SandgateServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
