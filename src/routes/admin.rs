use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Administration pages, nested under `/admin`. Access is decided by the navigation
/// guard from the route table: every route here requires a signed-in superadmin, and
/// anyone else is redirected (to the login page without a valid session, to the home
/// page otherwise).
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin
        // Admin dashboard layout.
        .route("/", get(handlers::admin_dashboard_page))
        // GET /admin/users
        // User management.
        .route("/users", get(handlers::user_management_page))
        // GET /admin/centers
        // Center management.
        .route("/centers", get(handlers::center_management_page))
}
