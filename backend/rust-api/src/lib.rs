use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; connect-src 'self'"),
    );
    response
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // The game pages are served from another origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v1",
            Router::new()
                .route(
                    "/settings/public",
                    get(handlers::settings::get_public_settings),
                )
                .nest("/assessments", assessment_routes())
                .nest("/attempts", attempt_routes())
                .layer(cors),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn assessment_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/{user_id}",
        get(handlers::assessments::get_assessment).post(handlers::assessments::create_assessment),
    )
}

fn attempt_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::attempts::mount_attempt))
        .route(
            "/{id}",
            get(handlers::attempts::get_attempt).delete(handlers::attempts::dispose_attempt),
        )
        .route("/{id}/start", post(handlers::attempts::start_attempt))
        .route("/{id}/signals", post(handlers::attempts::report_signal))
        .route("/{id}/progress", post(handlers::attempts::report_progress))
        .route("/{id}/complete", post(handlers::attempts::complete_attempt))
        .route("/{id}/quit", post(handlers::attempts::quit_attempt))
        .route(
            "/{id}/disqualify",
            post(handlers::attempts::disqualify_attempt),
        )
        .route("/{id}/persist/retry", post(handlers::attempts::retry_persist))
        .route("/{id}/stream", get(handlers::sse::attempt_stream))
}
