#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use proctor_api::{
    config::Config,
    create_router,
    services::{assessment_store::InMemoryAssessmentStore, attempt_runtime::AttemptHandle, AppState},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryAssessmentStore>,
}

/// In-memory app with the background clock disabled; tests drive ticks.
pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::default())
}

/// Same as [`create_test_app`] on top of `config`. Background tasks stay off:
/// tests tick attempts and sweep the registry themselves.
pub fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config {
        tick_interval_ms: 0,
        attempt_sweep_interval_seconds: 0,
        ..config
    };
    let store = Arc::new(InMemoryAssessmentStore::new());
    let state = Arc::new(AppState::in_memory(config, store.clone()));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.request("POST", uri, None).await
    }

    /// Mounts an attempt and returns its id, panicking on refusal.
    pub async fn mount(&self, user_id: &str, game: &str, trial: bool) -> Uuid {
        let (status, body) = self
            .post(
                &format!("/api/v1/attempts?trial={}", trial),
                serde_json::json!({ "user_id": user_id, "game_type": game }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "mount failed: {}", body);
        Uuid::parse_str(body["attempt_id"].as_str().unwrap()).unwrap()
    }

    pub async fn start(&self, attempt_id: Uuid) -> Value {
        let (status, body) = self
            .post(
                &format!("/api/v1/attempts/{}/start", attempt_id),
                serde_json::json!({ "fullscreen": "granted" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "start failed: {}", body);
        body
    }

    pub async fn signal(&self, attempt_id: Uuid, signal: &str) -> Value {
        let (status, body) = self
            .post(
                &format!("/api/v1/attempts/{}/signals", attempt_id),
                serde_json::json!({ "signal": signal }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "signal failed: {}", body);
        body
    }

    pub async fn tab_switch(&self, attempt_id: Uuid) -> Value {
        self.signal(attempt_id, "visibility_hidden").await;
        self.signal(attempt_id, "visibility_visible").await
    }

    pub async fn complete(&self, attempt_id: Uuid, score: u32) -> (StatusCode, Value) {
        self.post(
            &format!("/api/v1/attempts/{}/complete", attempt_id),
            serde_json::json!({ "score": score, "effort_metric": 1.5 }),
        )
        .await
    }

    pub async fn handle(&self, attempt_id: Uuid) -> AttemptHandle {
        self.state.registry.get(attempt_id).await.unwrap()
    }

    pub async fn ticks(&self, attempt_id: Uuid, count: u32) {
        let handle = self.handle(attempt_id).await;
        for _ in 0..count {
            assert!(handle.tick());
        }
    }

    /// Polls the attempt until its save is no longer pending.
    pub async fn settled(&self, attempt_id: Uuid) -> Value {
        for _ in 0..100 {
            let (_, body) = self.get(&format!("/api/v1/attempts/{}", attempt_id)).await;
            if body["persistence"]["status"] != "pending" {
                return body;
            }
            tokio::task::yield_now().await;
        }
        panic!("save of attempt {} never settled", attempt_id);
    }

    /// Scores a game through the full HTTP flow.
    pub async fn finish_game(&self, user_id: &str, game: &str, score: u32) -> Value {
        let attempt_id = self.mount(user_id, game, false).await;
        self.start(attempt_id).await;
        self.ticks(attempt_id, 5).await;
        let (status, body) = self.complete(attempt_id, score).await;
        assert_eq!(status, StatusCode::OK, "complete failed: {}", body);
        self.settled(attempt_id).await
    }
}
