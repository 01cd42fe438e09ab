use axum::http::StatusCode;
use proctor_api::config::Config;
use serde_json::json;
use uuid::Uuid;

mod common;

#[tokio::test]
async fn test_locked_game_is_refused_with_redirect() {
    let app = common::create_test_app();

    let (status, body) = app
        .post(
            "/api/v1/attempts",
            json!({ "user_id": "locked-user", "game_type": "question-game" }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "locked_game");
    assert_eq!(body["redirect"], "/assessment");
    assert_eq!(
        body["missing_prerequisites"],
        json!(["unblock-me", "minesweeper", "water-capacity"])
    );
    assert_eq!(app.state.registry.active_count().await, 0);
}

#[tokio::test]
async fn test_unknown_game_returns_400() {
    let app = common::create_test_app();
    let (status, body) = app
        .post(
            "/api/v1/attempts",
            json!({ "user_id": "u", "game_type": "tetris" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "unknown_game");
}

#[tokio::test]
async fn test_denied_fullscreen_keeps_attempt_idle() {
    let app = common::create_test_app();
    let attempt_id = app.mount("fs-user", "unblock-me", false).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/attempts/{}/start", attempt_id),
            json!({ "fullscreen": "denied" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "fullscreen_denied");

    app.ticks(attempt_id, 3).await;
    let (_, snapshot) = app.get(&format!("/api/v1/attempts/{}", attempt_id)).await;
    assert_eq!(snapshot["phase"], "not_started");
    assert_eq!(snapshot["clock"]["remaining_seconds"], 300);

    // The page may ask again
    let snapshot = app.start(attempt_id).await;
    assert_eq!(snapshot["phase"], "armed");
}

#[tokio::test]
async fn test_scored_completion_is_saved_and_unlocks_next_game() {
    let app = common::create_test_app();
    let attempt_id = app.mount("flow-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.ticks(attempt_id, 42).await;

    let (status, body) = app.complete(attempt_id, 7).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "finished");
    assert_eq!(body["outcome"]["outcome"], "completed");
    assert_eq!(body["outcome"]["result"]["puzzles_completed"], 7);
    assert_eq!(body["outcome"]["result"]["time_spent_seconds"], 42);

    let snapshot = app.settled(attempt_id).await;
    assert_eq!(snapshot["persistence"]["status"], "saved");
    assert_eq!(app.store.save_count(), 1);

    let (_, overview) = app.get("/api/v1/assessments/flow-user").await;
    assert_eq!(overview["games"][0]["attempted"], true);
    assert_eq!(overview["games"][1]["unlocked"], true);
    assert_eq!(overview["games"][2]["unlocked"], false);
    assert!(overview["total_score"].is_null());
}

#[tokio::test]
async fn test_already_completed_game_cannot_be_replayed() {
    let app = common::create_test_app();
    app.finish_game("replay-user", "unblock-me", 3).await;

    let (status, body) = app
        .post(
            "/api/v1/attempts",
            json!({ "user_id": "replay-user", "game_type": "unblock-me" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_completed");
    assert_eq!(body["redirect"], "/assessment");

    // Practice is never gated
    app.mount("replay-user", "unblock-me", true).await;
}

#[tokio::test]
async fn test_clock_expiry_records_best_effort_result() {
    let app = common::create_test_app();
    app.finish_game("slow-user", "unblock-me", 2).await;
    let attempt_id = app.mount("slow-user", "minesweeper", false).await;
    app.start(attempt_id).await;
    app.post(
        &format!("/api/v1/attempts/{}/progress", attempt_id),
        json!({ "puzzles_completed": 60, "effort_metric": 0.1 }),
    )
    .await;

    app.ticks(attempt_id, 300).await;
    let snapshot = app.settled(attempt_id).await;

    assert_eq!(snapshot["phase"], "finished");
    assert_eq!(snapshot["outcome"]["outcome"], "expired");
    assert_eq!(snapshot["outcome"]["result"]["puzzles_completed"], 60);
    assert_eq!(snapshot["outcome"]["result"]["time_spent_seconds"], 300);
    assert_eq!(snapshot["clock"]["remaining_seconds"], 0);
    assert_eq!(snapshot["persistence"]["status"], "saved");

    // Late completion from the game is ignored
    let (status, body) = app.complete(attempt_id, 99).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"]["puzzles_completed"], 60);
}

#[tokio::test]
async fn test_fullscreen_exit_pauses_clock() {
    let app = common::create_test_app();
    let attempt_id = app.mount("pause-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.ticks(attempt_id, 10).await;

    let snapshot = app.signal(attempt_id, "fullscreen_exited").await;
    assert_eq!(snapshot["phase"], "paused");
    assert_eq!(snapshot["paused"], true);
    assert_eq!(snapshot["violations"], 0);

    app.ticks(attempt_id, 50).await;
    let (status, body) = app.complete(attempt_id, 1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_phase");

    let snapshot = app.signal(attempt_id, "fullscreen_entered").await;
    assert_eq!(snapshot["phase"], "armed");
    assert_eq!(snapshot["clock"]["remaining_seconds"], 290);
}

#[tokio::test]
async fn test_three_tab_switches_disqualify() {
    let app = common::create_test_app();
    let attempt_id = app.mount("cheat-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.post(
        &format!("/api/v1/attempts/{}/progress", attempt_id),
        json!({ "puzzles_completed": 4 }),
    )
    .await;

    let first = app.tab_switch(attempt_id).await;
    assert_eq!(first["violations"], 1);
    assert_eq!(first["phase"], "armed");

    // Hidden twice in a row counts once
    app.signal(attempt_id, "visibility_hidden").await;
    app.signal(attempt_id, "visibility_hidden").await;
    let second = app.signal(attempt_id, "visibility_visible").await;
    assert_eq!(second["violations"], 2);

    let third = app.tab_switch(attempt_id).await;
    assert_eq!(third["phase"], "disqualified");
    assert_eq!(third["violations"], 3);

    let snapshot = app.settled(attempt_id).await;
    let result = &snapshot["outcome"]["result"];
    assert_eq!(result["failed"], true);
    assert_eq!(
        result["failure_reason"],
        "Disqualified due to tab switching violations"
    );
    assert_eq!(result["puzzles_completed"], 4);

    // The slot is used up but the next game is open
    let (_, overview) = app.get("/api/v1/assessments/cheat-user").await;
    assert_eq!(overview["games"][0]["result"]["failed"], true);
    assert_eq!(overview["games"][1]["unlocked"], true);

    // Monitor is torn down: further signals change nothing
    let after = app.tab_switch(attempt_id).await;
    assert_eq!(after["violations"], 3);
}

#[tokio::test]
async fn test_external_disqualification() {
    let app = common::create_test_app();
    let attempt_id = app.mount("dq-user", "unblock-me", false).await;
    app.start(attempt_id).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/attempts/{}/disqualify", attempt_id),
            json!({ "reason": "Proctor ended the attempt" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "disqualified");
    assert_eq!(
        body["outcome"]["result"]["failure_reason"],
        "Proctor ended the attempt"
    );
}

#[tokio::test]
async fn test_quit_discards_progress() {
    let app = common::create_test_app();
    let attempt_id = app.mount("quit-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.ticks(attempt_id, 20).await;

    let (status, body) = app
        .post_empty(&format!("/api/v1/attempts/{}/quit", attempt_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "quit");
    assert_eq!(body["persistence"]["status"], "not_required");

    app.ticks(attempt_id, 5).await;
    let snapshot = app.tab_switch(attempt_id).await;
    assert_eq!(snapshot["violations"], 0);
    assert_eq!(snapshot["elapsed_seconds"], 20);

    assert_eq!(app.store.save_count(), 0);
    let (_, overview) = app.get("/api/v1/assessments/quit-user").await;
    assert_eq!(overview["games"][0]["attempted"], false);

    // Quitting leaves the game open for a real attempt
    app.mount("quit-user", "unblock-me", false).await;
}

#[tokio::test]
async fn test_practice_mode_is_unenforced_and_unsaved() {
    let app = common::create_test_app();
    let attempt_id = app.mount("trial-user", "question-game", true).await;

    let snapshot = app.start(attempt_id).await;
    assert_eq!(snapshot["mode"], "practice");
    assert!(snapshot["clock"]["remaining_seconds"].is_null());

    app.ticks(attempt_id, 700).await;
    let snapshot = app.tab_switch(attempt_id).await;
    assert_eq!(snapshot["violations"], 0);
    assert_eq!(snapshot["phase"], "armed");
    assert_eq!(snapshot["elapsed_seconds"], 700);

    let (status, body) = app.complete(attempt_id, 12).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["persistence"]["status"], "not_required");
    assert_eq!(app.store.save_count(), 0);
}

#[tokio::test]
async fn test_failed_save_is_reported_and_retried() {
    let app = common::create_test_app();
    let attempt_id = app.mount("flaky-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.store.fail_next_saves(1);

    app.complete(attempt_id, 5).await;
    let snapshot = app.settled(attempt_id).await;
    assert_eq!(snapshot["persistence"]["status"], "failed");
    assert!(snapshot["persistence"]["error"].is_string());

    // The decided result still gates entry before it reaches the store
    let (status, _) = app
        .post(
            "/api/v1/attempts",
            json!({ "user_id": "flaky-user", "game_type": "minesweeper" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(app.store.save_count(), 0);
    assert!(app.state.lane.has_unsaved("flaky-user"));
}

#[tokio::test]
async fn test_retry_endpoint_saves_result() {
    let app = common::create_test_app();
    let attempt_id = app.mount("retry-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.store.fail_next_saves(1);
    app.complete(attempt_id, 5).await;
    app.settled(attempt_id).await;

    let (status, _) = app
        .post_empty(&format!("/api/v1/attempts/{}/persist/retry", attempt_id))
        .await;
    assert_eq!(status, StatusCode::OK);

    let snapshot = app.settled(attempt_id).await;
    assert_eq!(snapshot["persistence"]["status"], "saved");
    assert_eq!(app.store.save_count(), 1);
    assert!(!app.state.lane.has_unsaved("retry-user"));
}

#[tokio::test]
async fn test_remount_disposes_previous_attempt() {
    let app = common::create_test_app();
    let first = app.mount("nav-user", "unblock-me", false).await;
    app.start(first).await;

    let second = app.mount("nav-user", "unblock-me", true).await;
    assert_ne!(first, second);

    let (status, _) = app.get(&format!("/api/v1/attempts/{}", first)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.state.registry.active_count().await, 1);

    // The abandoned scored attempt left no result behind
    let (_, overview) = app.get("/api/v1/assessments/nav-user").await;
    assert_eq!(overview["games"][0]["attempted"], false);
}

#[tokio::test]
async fn test_delete_disposes_attempt() {
    let app = common::create_test_app();
    let attempt_id = app.mount("gone-user", "unblock-me", false).await;
    app.start(attempt_id).await;

    let (status, body) = app
        .request("DELETE", &format!("/api/v1/attempts/{}", attempt_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "quit");

    let (status, body) = app
        .request("DELETE", &format!("/api/v1/attempts/{}", attempt_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "attempt_not_found");
}

#[tokio::test]
async fn test_unknown_attempt_returns_404() {
    let app = common::create_test_app();
    let (status, _) = app
        .post_empty(&format!("/api/v1/attempts/{}/quit", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refused_mount_leaves_running_attempt_alone() {
    let app = common::create_test_app();
    let attempt_id = app.mount("busy-user", "unblock-me", false).await;
    app.start(attempt_id).await;

    let (status, body) = app
        .post(
            "/api/v1/attempts",
            json!({ "user_id": "busy-user", "game_type": "water-capacity" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "locked_game");

    let (status, snapshot) = app.get(&format!("/api/v1/attempts/{}", attempt_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["phase"], "armed");

    let (status, _) = app.complete(attempt_id, 4).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_sweep_evicts_settled_attempts() {
    let app = common::create_test_app_with(Config {
        attempt_retention_seconds: 0,
        ..Config::default()
    });
    let finished = app.mount("sweep-user", "unblock-me", false).await;
    app.start(finished).await;
    let (status, _) = app.complete(finished, 3).await;
    assert_eq!(status, StatusCode::OK);
    app.settled(finished).await;

    let running = app.mount("other-user", "unblock-me", false).await;
    app.start(running).await;
    assert_eq!(app.state.registry.active_count().await, 2);

    assert_eq!(app.state.registry.sweep().await, 1);
    assert_eq!(app.state.registry.active_count().await, 1);

    let (status, _) = app.get(&format!("/api/v1/attempts/{}", finished)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/api/v1/attempts/{}", running)).await;
    assert_eq!(status, StatusCode::OK);

    // The evicted attempt's result is still on record
    let (_, overview) = app.get("/api/v1/assessments/sweep-user").await;
    assert_eq!(overview["games"][0]["attempted"], true);
}

#[tokio::test]
async fn test_settled_attempt_stays_readable_during_retention() {
    let app = common::create_test_app();
    let attempt_id = app.mount("keep-user", "unblock-me", false).await;
    app.start(attempt_id).await;
    app.complete(attempt_id, 3).await;
    app.settled(attempt_id).await;

    assert_eq!(app.state.registry.sweep().await, 0);
    let (status, _) = app.get(&format!("/api/v1/attempts/{}", attempt_id)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_sweep_tears_down_abandoned_attempts() {
    let app = common::create_test_app_with(Config {
        attempt_abandon_after_seconds: 0,
        ..Config::default()
    });
    let attempt_id = app.mount("idle-user", "unblock-me", false).await;

    assert_eq!(app.state.registry.sweep().await, 1);
    assert_eq!(app.state.registry.active_count().await, 0);
    let (status, _) = app.get(&format!("/api/v1/attempts/{}", attempt_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, overview) = app.get("/api/v1/assessments/idle-user").await;
    assert_eq!(overview["games"][0]["attempted"], false);
}
