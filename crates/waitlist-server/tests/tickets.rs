//! Router-level integration tests for the ticket contract.
//!
//! Exercises the Axum router directly with `tower::ServiceExt::oneshot`
//! against an in-memory store — no bound socket, no real director timing
//! beyond what each test spawns for itself.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use waitlist_core::director::Director;
use waitlist_core::queue::QueueManager;
use waitlist_core::ticket::CreateParams;
use waitlist_core::waiter::WaiterRegistry;
use waitlist_server::routes::tickets::router;
use waitlist_server::state::AppState;
use waitlist_store::{MemoryBackend, StorageBackend};

fn test_state() -> Arc<AppState> {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let wake = Arc::new(tokio::sync::Notify::new());
    Arc::new(AppState {
        queue_manager: Arc::new(QueueManager::new(Arc::clone(&store), wake)),
        waiters: Arc::new(WaiterRegistry::new()),
        store,
    })
}

fn app(state: Arc<AppState>) -> Router {
    router().with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let state = test_state();
    let router = app(Arc::clone(&state));

    let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
    let req = Request::builder()
        .method("POST")
        .uri("/servers/srv-1/tickets")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"scope": "vm", "id": "A", "expires_at": expires_at}).to_string(),
        ))
        .unwrap();

    let response = router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    let uuid = created["uuid"].as_str().unwrap().to_owned();

    let req = Request::builder()
        .uri(format!("/tickets/{uuid}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;
    assert_eq!(ticket["scope"], "vm");
    assert_eq!(ticket["status"], "queued");
}

#[tokio::test]
async fn create_rejects_malformed_expires_at() {
    let state = test_state();
    let router = app(state);

    let req = Request::builder()
        .method("POST")
        .uri("/servers/srv-1/tickets")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"scope": "vm", "id": "A", "expires_at": "not-a-time"}).to_string(),
        ))
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_all_without_force_is_precondition_failed() {
    let state = test_state();
    let router = app(state);

    let req = Request::builder()
        .method("DELETE")
        .uri("/servers/srv-1/tickets")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn delete_all_with_force_clears_the_server() {
    let state = test_state();
    let router = app(Arc::clone(&state));

    let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
    for _ in 0..3 {
        state
            .queue_manager
            .create(CreateParams {
                server_uuid: "srv-1".to_owned(),
                scope: "vm".to_owned(),
                id: "A".to_owned(),
                expires_at: expires_at.clone(),
                action: None,
                extra: None,
                req_id: "req".to_owned(),
            })
            .await
            .unwrap();
    }

    let req = Request::builder()
        .method("DELETE")
        .uri("/servers/srv-1/tickets?force=true")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let req = Request::builder()
        .uri("/servers/srv-1/tickets")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn wait_on_unknown_ticket_is_not_found() {
    let state = test_state();
    let router = app(state);

    let req = Request::builder()
        .uri(format!("/tickets/{}/wait", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wait_resolves_once_director_promotes_the_ticket() {
    let state = test_state();
    let router = app(Arc::clone(&state));

    let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
    let outcome = state
        .queue_manager
        .create(CreateParams {
            server_uuid: "srv-1".to_owned(),
            scope: "vm".to_owned(),
            id: "A".to_owned(),
            expires_at,
            action: None,
            extra: None,
            req_id: "req".to_owned(),
        })
        .await
        .unwrap();

    let director = Director::new(
        Arc::clone(&state.store),
        Arc::clone(&state.waiters),
        Arc::new(tokio::sync::Notify::new()),
        Duration::from_millis(20),
    );
    let handle = director.spawn().await;

    let req = Request::builder()
        .uri(format!("/tickets/{}/wait", outcome.uuid))
        .body(Body::empty())
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(1), router.oneshot(req))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    handle.stop().await;
}

#[tokio::test]
async fn release_unknown_ticket_is_not_found() {
    let state = test_state();
    let router = app(state);

    let req = Request::builder()
        .method("PUT")
        .uri(format!("/tickets/{}/release", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
