use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Session, center scoping and access control.
pub mod auth;
pub mod centers;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod models;

// Rendering helpers for untrusted text.
pub mod format;
pub mod sanitize;
pub mod views;

// Page and API routers (public, authenticated, admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{HttpSessionBackend, MockSessionBackend, SessionState};
pub use centers::{CenterStores, MockCenterSource, PgCenterSource};
pub use config::AppConfig;

/// ApiDoc
///
/// OpenAPI document for the JSON API, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_routes, handlers::sign_in, handlers::sign_out,
        handlers::get_centers, handlers::select_center, handlers::get_center_name
    ),
    components(
        schemas(
            models::Center, models::CenterStoreView, models::SelectCenterRequest,
            models::CenterNameResponse, models::SessionSummary, models::RouteEntry,
        )
    ),
    tags(
        (name = "applicant-portal", description = "Applicant tracking portal API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single context shared by every request: the session backend, the per-user
/// center stores, and the configuration. Nothing here is process-global; tests build
/// their own instance around mock backends.
#[derive(Clone)]
pub struct AppState {
    /// Identity service port: resolves session tokens and forces claims refreshes.
    pub sessions: SessionState,
    /// One center store per signed-in user, created on sign-in and disposed on sign-out
    /// or session expiry.
    pub centers: Arc<CenterStores>,
    /// Immutable configuration loaded at startup.
    pub config: AppConfig,
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<CenterStores> {
    fn from_ref(app_state: &AppState) -> Arc<CenterStores> {
        app_state.centers.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects API requests without a resolvable session (401) before they reach a handler.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the page and API routers, the navigation guard, and the observability
/// layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 1. Routers: docs, public pages and API, guarded pages, session API.
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::home_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest("/admin", admin::admin_routes())
        // Every page navigation passes the guard; non-page paths pass through it.
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            guard::navigation_guard,
        ))
        .with_state(state);

    // 2. Observability: request ids, one span per request, latency on response.
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, correlated by the generated `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
