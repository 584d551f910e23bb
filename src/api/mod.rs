//! API layer - HTTP handlers and routing
//!
//! Every endpoint lives under `/api/v1`:
//! - Auth endpoints (registration, both logins, refresh, profile)
//! - Project endpoints
//! - Admin dashboard endpoints
//! - Health check

pub mod admin;
pub mod auth;
pub mod common;
pub mod middleware;
pub mod projects;
pub mod responses;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedAccount, CurrentSubject, RequestStats};

use responses::HealthResponse;

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need an active admin)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need a valid access token)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/projects", projects::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Routes that work with or without a token
    let optional_routes = Router::new()
        .nest("/projects", projects::public_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::public_router(state.clone()))
        .merge(optional_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::api_rate_limit,
        ))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    middleware::set_expose_internal_errors(state.expose_errors);

    let origin = if cors_origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        match cors_origin.parse::<HeaderValue>() {
            Ok(origin) => AllowOrigin::list([origin]),
            Err(_) => {
                tracing::warn!(cors_origin, "Invalid CORS origin, cross-origin requests disabled");
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.pool.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check: database unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "error",
                }),
            )
        }
    }
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
