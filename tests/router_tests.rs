//! HTTP-level tests for the router, driven through `tower::ServiceExt::oneshot`

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;
use wshub::config::{BuiltinHandler, ServerConfig};
use wshub::core::telemetry::Telemetry;
use wshub::server::websocket::{
    Broadcaster, ConnectionRegistry, HandlerRegistry, MessageRouter, SessionContext, build_router,
};

fn context(config: &ServerConfig) -> Arc<SessionContext> {
    let telemetry = Arc::new(Telemetry::new());
    let hub = Broadcaster::new(Arc::new(ConnectionRegistry::new(telemetry.clone())), telemetry);
    Arc::new(SessionContext {
        router: MessageRouter::new(
            Arc::new(HandlerRegistry::with_builtins(&BuiltinHandler::all())),
            hub,
        ),
        origin_policy: config.origin_policy.clone(),
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_route_answers_ok() {
    let config = ServerConfig::default();
    let app = build_router(&config, context(&config));

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_health_route_can_be_disabled() {
    let config = ServerConfig {
        health_path: None,
        ..ServerConfig::default()
    };
    let app = build_router(&config, context(&config));

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plain_get_on_upgrade_path_is_refused() {
    let config = ServerConfig {
        base_path: "/ws".to_string(),
        ..ServerConfig::default()
    };
    let app = build_router(&config, context(&config));

    let response = app.oneshot(get("/ws")).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let config = ServerConfig::default();
    let app = build_router(&config, context(&config));

    let response = app.oneshot(get("/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
