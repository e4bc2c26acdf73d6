use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints reachable without a session. The login page is still passed through the
/// navigation guard, whose route meta lets it through unconditionally.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // GET /login
        // The login page shell.
        .route("/login", get(handlers::login_page))
        // GET /api/routes
        // The page route table, for deep-link validation on the client.
        .route("/api/routes", get(handlers::get_routes))
}
