//! End-to-end tests for the HTTP API, driven through the router without a
//! listening socket.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use sandgate_core::{
    ControllerConfig, CoreError, HealthCheck, IngressConfig, LifecycleController, LocalBackend,
    LocalBackendConfig, LocalFabric, RouteMode, SandboxBackend, SandboxId, SandboxState,
    StaticCredentials,
};
use sandgate_server::{http::build_router, ErrorBody, SandgateConfig, SandgateServer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const KEY: &str = "test-key";

struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn status(&self, _url: &str, _timeout: Duration) -> Result<u16, CoreError> {
        Ok(200)
    }
}

struct TestApp {
    router: Router,
    backend: Arc<LocalBackend>,
}

fn app() -> TestApp {
    app_with(LocalBackendConfig::default())
}

fn app_with(backend_config: LocalBackendConfig) -> TestApp {
    let backend = Arc::new(LocalBackend::new(backend_config));
    let config = ControllerConfig::builder()
        .probe_max_attempts(3)
        .probe_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let controller = Arc::new(LifecycleController::new(
        backend.clone(),
        Arc::new(LocalFabric::new()),
        Arc::new(StaticCredentials::new([KEY])),
        Arc::new(AlwaysHealthy),
        config,
    ));
    let server = SandgateServer::with_controller(controller, SandgateConfig::default());
    TestApp {
        router: build_router(server),
        backend,
    }
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "testserver")
        .header("SANDGATE-API-KEY", KEY);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create_running(app: &TestApp) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/v1/sandboxes",
            Some(json!({
                "image": "ghcr.io/nullclaw/nullclaw:latest",
                "timeout": 3600,
                "metadata": {"example": "nullclaw"},
                "networkPolicy": {
                    "defaultAction": "deny",
                    "egress": [{"action": "allow", "target": "openrouter.ai"}]
                }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["state"], "Running");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let app = app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_api_key() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/v1/sandboxes/sbx-001/pause")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_API_KEY");
}

#[tokio::test]
async fn test_every_v1_route_requires_valid_key() {
    let app = app();
    let create_body = json!({"image": "python:3.12", "timeout": 60}).to_string();
    let routes = [
        ("POST", "/v1/sandboxes", Some(create_body)),
        ("GET", "/v1/sandboxes/sbx-001", None),
        ("GET", "/v1/sandboxes/sbx-001/endpoints/not-a-port", None),
        ("POST", "/v1/sandboxes/sbx-001/pause", None),
        ("POST", "/v1/sandboxes/sbx-001/resume", None),
    ];

    for (method, uri, body) in routes {
        for key in [None, Some("wrong-key")] {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json");
            if let Some(key) = key {
                builder = builder.header("SANDGATE-API-KEY", key);
            }
            let body = body.clone().map(Body::from).unwrap_or_else(Body::empty);
            let (status, response) = send(&app, builder.body(body).unwrap()).await;

            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri} key={key:?}");
            assert_eq!(response["code"], "MISSING_API_KEY", "{method} {uri} key={key:?}");
        }
    }
    assert!(app.backend.is_empty().await);
}

#[tokio::test]
async fn test_create_describe_pause_resume() {
    let app = app();
    let id = create_running(&app).await;

    let (status, body) = send(&app, request("GET", &format!("/v1/sandboxes/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["example"], "nullclaw");

    let (status, _) = send(
        &app,
        request("POST", &format!("/v1/sandboxes/{id}/pause"), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        app.backend
            .describe(&SandboxId::from(id.as_str()))
            .await
            .unwrap()
            .state,
        SandboxState::Pausing
    );

    // A second pause while the first is in flight is a conflict
    let (status, body) = send(
        &app,
        request("POST", &format!("/v1/sandboxes/{id}/pause"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");

    app.backend
        .update_state(
            &SandboxId::from(id.as_str()),
            SandboxState::Pausing,
            SandboxState::Paused,
        )
        .await
        .unwrap();

    let (status, _) = send(
        &app,
        request("POST", &format!("/v1/sandboxes/{id}/resume"), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_pause_unknown_sandbox() {
    let app = app();
    let (status, body) = send(&app, request("POST", "/v1/sandboxes/missing/pause", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let body: ErrorBody = serde_json::from_value(body).unwrap();
    assert_eq!(
        body,
        ErrorBody {
            code: "SANDBOX_NOT_FOUND".into(),
            message: "Sandbox missing not found".into(),
        }
    );

    let (status, body) = send(&app, request("POST", "/v1/sandboxes/missing/resume", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SANDBOX_NOT_FOUND");
}

#[tokio::test]
async fn test_create_rejects_invalid_policy() {
    let app = app();
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/v1/sandboxes",
            Some(json!({
                "image": "python:3.12",
                "timeout": 60,
                "networkPolicy": {"egress": [{"action": "allow", "target": "bad host"}]}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert!(app.backend.is_empty().await);
}

#[tokio::test]
async fn test_create_rejects_malformed_body() {
    let app = app();
    let (status, body) = send(
        &app,
        request("POST", "/v1/sandboxes", Some(json!({"timeout": "soon"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_endpoint_direct_and_proxied() {
    let app = app();
    let id = create_running(&app).await;

    let (status, body) = send(
        &app,
        request("GET", &format!("/v1/sandboxes/{id}/endpoints/44772"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"endpoint": "127.0.0.1:44772"}));

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/v1/sandboxes/{id}/endpoints/44772?use_server_proxy=true"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["endpoint"],
        format!("testserver/sandboxes/{id}/proxy/44772")
    );
}

#[tokio::test]
async fn test_endpoint_invalid_port() {
    let app = app();
    let id = create_running(&app).await;

    for port in ["not-a-port", "0", "70000"] {
        let (status, body) = send(
            &app,
            request("GET", &format!("/v1/sandboxes/{id}/endpoints/{port}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{port}");
        assert_eq!(body["code"], "INVALID_REQUEST");
    }
}

#[tokio::test]
async fn test_endpoint_invalid_query() {
    let app = app();
    let id = create_running(&app).await;

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/v1/sandboxes/{id}/endpoints/8080?use_server_proxy=maybe"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_endpoint_unknown_sandbox() {
    let app = app();
    let (status, body) = send(
        &app,
        request("GET", "/v1/sandboxes/missing/endpoints/8080", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Sandbox missing not found");
}

#[tokio::test]
async fn test_create_with_misconfigured_gateway() {
    let app = app_with(LocalBackendConfig {
        ingress: Some(IngressConfig::gateway("gw.example.com", RouteMode::Wildcard)),
        ..Default::default()
    });

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/v1/sandboxes",
            Some(json!({"image": "python:3.12", "timeout": 60})),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INGRESS_MISCONFIGURED");
}

#[test]
fn test_misconfigured_gateway_fails_validation() {
    let config = SandgateConfig {
        ingress: IngressConfig::gateway("gw.example.com", RouteMode::Wildcard),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
