use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Home Router
///
/// The applicant list page. Guarded by the navigation guard (authentication required),
/// not by the API extractor layer: unauthenticated navigations are redirected to the
/// login page instead of being answered with 401.
pub fn home_routes() -> Router<AppState> {
    Router::new().route("/", get(handlers::home_page))
}

/// Authenticated Router Module
///
/// JSON API for a signed-in session. Every handler here takes the `AuthUser` extractor,
/// and the router is additionally wrapped in the authentication layer in `lib.rs`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /api/session/sign-in
        // Forced claims refresh, then (re)initializes the caller's center store.
        .route("/api/session/sign-in", post(handlers::sign_in))
        // POST /api/session/sign-out
        // Releases the caller's center subscription and disposes the store.
        .route("/api/session/sign-out", post(handlers::sign_out))
        // GET /api/centers
        // Current center store view: selection, centers, filter flags.
        .route("/api/centers", get(handlers::get_centers))
        // PUT /api/centers/selected
        // Changes the active center filter.
        .route("/api/centers/selected", put(handlers::select_center))
        // GET /api/centers/{id}/name
        // Display name lookup with the unknown-center placeholder.
        .route("/api/centers/{id}/name", get(handlers::get_center_name))
}
