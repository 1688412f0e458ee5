//! Route definitions for the AccessLens API.

pub mod content;
pub mod findings;
pub mod health;
pub mod maintenance;
pub mod rules;
pub mod scans;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Request bodies above this are rejected; scan payloads carry markup snapshots.
const BODY_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/findings", get(findings::list).post(findings::create))
        .route("/findings/count", get(findings::count))
        .route(
            "/findings/{id}",
            get(findings::get_by_id)
                .put(findings::update)
                .delete(findings::delete),
        )
        .route("/findings/{id}/suppression", post(findings::set_suppression))
        .route("/findings/{id}/locate", get(findings::locate))
        .route("/content/{id}", put(content::upsert).delete(content::delete))
        .route("/content/{id}/violations", post(content::submit_violations))
        .route(
            "/content/{id}/suppressions/clear",
            post(content::clear_suppressions),
        )
        .route("/content/{id}/scan", post(content::scan))
        .route("/content/{id}/queue", post(content::queue))
        .route("/content/{id}/summary", get(content::summary))
        .route("/scan/messages", post(scans::post_message))
        .route("/maintenance/orphans", post(maintenance::cleanup_orphans))
        .route("/rules", get(rules::list));

    let origins: Vec<HeaderValue> = [&state.config.frontend_url, &state.config.trusted_origin]
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .expose_headers([
            HeaderName::from_static("x-total-count"),
            HeaderName::from_static("x-total-pages"),
        ]);

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .with_state(state)
}
