use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_new_user_sees_only_first_game_unlocked() {
    let app = common::create_test_app();
    let (status, body) = app.get("/api/v1/assessments/fresh-user").await;

    assert_eq!(status, StatusCode::OK);
    let games = body["games"].as_array().unwrap();
    assert_eq!(games.len(), 4);
    assert_eq!(games[0]["game"], "unblock-me");
    assert_eq!(games[0]["unlocked"], true);
    for game in &games[1..] {
        assert_eq!(game["unlocked"], false);
        assert_eq!(game["attempted"], false);
    }
    assert_eq!(
        games[3]["missing_prerequisites"],
        json!(["unblock-me", "minesweeper", "water-capacity"])
    );
    assert!(body["total_score"].is_null());
}

#[tokio::test]
async fn test_create_assessment_is_idempotent() {
    let app = common::create_test_app();

    let (status, _) = app.post_empty("/api/v1/assessments/new-user").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.store.save_count(), 1);

    app.finish_game("new-user", "unblock-me", 2).await;
    let saves = app.store.save_count();

    let (status, body) = app.post_empty("/api/v1/assessments/new-user").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["games"][0]["attempted"], true);
    assert_eq!(app.store.save_count(), saves);
}

#[tokio::test]
async fn test_full_assessment_computes_weighted_total_once() {
    let app = common::create_test_app();
    let user = "journey-user";

    app.finish_game(user, "unblock-me", 4).await;
    app.finish_game(user, "minesweeper", 180).await;
    let (_, overview) = app.get(&format!("/api/v1/assessments/{}", user)).await;
    assert!(overview["total_score"].is_null());
    assert_eq!(overview["games"][3]["unlocked"], false);

    app.finish_game(user, "water-capacity", 3).await;
    let (_, overview) = app.get(&format!("/api/v1/assessments/{}", user)).await;
    assert_eq!(overview["total_score"], 215);
    assert_eq!(overview["games"][3]["unlocked"], true);
    let completed_at = overview["completed_at"].clone();
    assert!(completed_at.is_string());

    app.finish_game(user, "question-game", 10).await;
    let (_, overview) = app.get(&format!("/api/v1/assessments/{}", user)).await;
    assert_eq!(overview["total_score"], 225);
    assert_eq!(overview["completed_at"], completed_at);
}

#[tokio::test]
async fn test_public_settings_expose_roles_and_links() {
    let app = common::create_test_app();
    let (status, body) = app.get("/api/v1/settings/public").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["available_roles"].is_array());
    assert!(body["contact_links"].is_object());
    assert!(body.get("time_budgets").is_none());
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = common::create_test_app();
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["assessment_store"]["status"], "healthy");
    assert!(body["dependencies"].get("redis").is_none());
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = common::create_test_app();

    let (status, _) = app.get("/metrics").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let credentials =
        std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header(
                    "authorization",
                    format!("Basic {}", general_purpose::STANDARD.encode(credentials)),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn next_chunk(body: &mut Body) -> Option<String> {
    loop {
        let frame = body.frame().await?.ok()?;
        if let Ok(data) = frame.into_data() {
            return Some(String::from_utf8_lossy(&data).to_string());
        }
    }
}

#[tokio::test]
async fn test_stream_relays_events_until_terminal() {
    let app = common::create_test_app();
    let attempt_id = app.mount("stream-user", "unblock-me", false).await;
    app.start(attempt_id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/attempts/{}/stream", attempt_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();

    let first = next_chunk(&mut body).await.unwrap();
    assert!(first.contains("event: snapshot"), "{}", first);

    app.ticks(attempt_id, 1).await;
    let tick = next_chunk(&mut body).await.unwrap();
    assert!(tick.contains("event: timer-tick"), "{}", tick);
    assert!(tick.contains("\"remaining_seconds\":299"), "{}", tick);

    app.post_empty(&format!("/api/v1/attempts/{}/quit", attempt_id))
        .await;
    let quit = next_chunk(&mut body).await.unwrap();
    assert!(quit.contains("event: quit"), "{}", quit);
    assert!(next_chunk(&mut body).await.is_none());
}

#[tokio::test]
async fn test_stream_of_finished_attempt_closes_after_snapshot() {
    let app = common::create_test_app();
    let attempt_id = app.mount("late-user", "unblock-me", true).await;
    app.start(attempt_id).await;
    app.post_empty(&format!("/api/v1/attempts/{}/quit", attempt_id))
        .await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/attempts/{}/stream", attempt_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("event: snapshot"));
    assert!(text.contains("\"phase\":\"finished\""));
}
