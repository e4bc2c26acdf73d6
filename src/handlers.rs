use crate::{
    AppState,
    auth::AuthUser,
    config::AppConfig,
    models::{
        CenterNameResponse, CenterSelection, CenterStoreView, RouteEntry, SelectCenterRequest,
        SessionSummary, SessionUser,
    },
    routes,
    views::render_shell,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::Html,
};

// --- Page Handlers ---

// Page routes only run after the navigation guard has let the navigation through, so
// the user extension (when present) carries refreshed claims.

/// page
///
/// Renders the SPA shell for `route_name`. The client router reads the route name and
/// the signed-in identity from the shell's data attributes.
fn page(config: &AppConfig, route_name: &str, user: Option<Extension<SessionUser>>) -> Html<String> {
    let user = user.map(|Extension(user)| user);
    Html(render_shell(&config.app_title, route_name, user.as_ref()))
}

/// login_page
///
/// [Public Route] The login page. Reachable with or without a session.
pub async fn login_page(
    State(config): State<AppConfig>,
    user: Option<Extension<SessionUser>>,
) -> Html<String> {
    page(&config, routes::LOGIN, user)
}

/// home_page
///
/// [Guarded Route] The applicant list. Requires a session; any role may view it.
pub async fn home_page(
    State(config): State<AppConfig>,
    user: Option<Extension<SessionUser>>,
) -> Html<String> {
    page(&config, routes::HOME, user)
}

/// admin_dashboard_page
///
/// [Superadmin Route] Layout page of the administration area.
pub async fn admin_dashboard_page(
    State(config): State<AppConfig>,
    user: Option<Extension<SessionUser>>,
) -> Html<String> {
    page(&config, routes::ADMIN, user)
}

/// user_management_page
///
/// [Superadmin Route] Account and role administration.
pub async fn user_management_page(
    State(config): State<AppConfig>,
    user: Option<Extension<SessionUser>>,
) -> Html<String> {
    page(&config, routes::USER_MANAGEMENT, user)
}

/// center_management_page
///
/// [Superadmin Route] Center administration.
pub async fn center_management_page(
    State(config): State<AppConfig>,
    user: Option<Extension<SessionUser>>,
) -> Html<String> {
    page(&config, routes::CENTER_MANAGEMENT, user)
}

// --- API Handlers ---

/// get_routes
///
/// [Public Route] The page route table, flattened, with full paths.
#[utoipa::path(
    get,
    path = "/api/routes",
    responses((status = 200, description = "Route table", body = [RouteEntry]))
)]
pub async fn get_routes() -> Json<Vec<RouteEntry>> {
    Json(routes::route_entries())
}

/// sign_in
///
/// [Authenticated Route] Forces a claims refresh for the caller and initializes the
/// caller's center store with the refreshed claims. A failed refresh is answered with
/// 401 so the client goes back to the login page.
///
/// *Note*: The claims embedded in the session token are never used here; the store is
/// scoped by the refreshed copy only. The store lives until sign-out or until the
/// session token's expiry, whichever comes first.
#[utoipa::path(
    post,
    path = "/api/session/sign-in",
    responses(
        (status = 200, description = "Signed in", body = SessionSummary),
        (status = 401, description = "Session invalid or claims refresh failed")
    )
)]
pub async fn sign_in(
    AuthUser { mut user }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<SessionSummary>, StatusCode> {
    let claims = match state.sessions.refresh_claims(&user).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::error!(uid = %user.uid, "sign-in claims refresh failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let summary = SessionSummary {
        uid: user.uid.clone(),
        email: user.email.clone(),
        role: claims.role.as_ref().map(|role| role.to_string()),
        center_ids: claims.center_ids.clone(),
    };

    // 1. Scope the store by the refreshed claims.
    user.claims = Some(claims);
    // 2. Create or re-initialize the caller's store; the previous subscription is released.
    state.centers.sign_in(&user);
    tracing::info!(uid = %user.uid, role = ?summary.role, "session signed in");

    Ok(Json(summary))
}

/// sign_out
///
/// [Authenticated Route] Releases the caller's center subscription and disposes the
/// store. Idempotent: signing out without a store still answers 204.
#[utoipa::path(
    post,
    path = "/api/session/sign-out",
    responses((status = 204, description = "Signed out"))
)]
pub async fn sign_out(AuthUser { user }: AuthUser, State(state): State<AppState>) -> StatusCode {
    if state.centers.sign_out(&user.uid) {
        tracing::info!(uid = %user.uid, "session signed out");
    }
    StatusCode::NO_CONTENT
}

/// get_centers
///
/// [Authenticated Route] The caller's center store: selection, accessible centers and
/// the derived filter flags. 404 when the caller has not signed in, or when the store
/// was disposed after its session lapsed.
///
/// *Note*: Presenting a newer token extends the store's lifetime to that token's expiry.
#[utoipa::path(
    get,
    path = "/api/centers",
    responses(
        (status = 200, description = "Center store", body = CenterStoreView),
        (status = 404, description = "No store for this session")
    )
)]
pub async fn get_centers(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CenterStoreView>, StatusCode> {
    let store = state.centers.session_store(&user).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(store.state().view()))
}

/// select_center
///
/// [Authenticated Route] Sets the active center filter (`"all"` or a center id).
///
/// *Note*: The id is not checked against the accessible set; an id outside it simply
/// selects nothing and resolves to the unknown-center placeholder.
#[utoipa::path(
    put,
    path = "/api/centers/selected",
    request_body = SelectCenterRequest,
    responses(
        (status = 200, description = "Selection updated", body = CenterStoreView),
        (status = 404, description = "No store for this session")
    )
)]
pub async fn select_center(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SelectCenterRequest>,
) -> Result<Json<CenterStoreView>, StatusCode> {
    let store = state.centers.session_store(&user).ok_or(StatusCode::NOT_FOUND)?;
    store.set_selected_center_id(CenterSelection::from(payload.center_id));
    Ok(Json(store.state().view()))
}

/// get_center_name
///
/// [Authenticated Route] Display name of a center, with the unknown-center placeholder
/// for ids outside the caller's accessible set.
#[utoipa::path(
    get,
    path = "/api/centers/{id}/name",
    params(("id" = String, Path, description = "Center ID")),
    responses(
        (status = 200, description = "Center name", body = CenterNameResponse),
        (status = 404, description = "No store for this session")
    )
)]
pub async fn get_center_name(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CenterNameResponse>, StatusCode> {
    let store = state.centers.session_store(&user).ok_or(StatusCode::NOT_FOUND)?;
    let name = store.state().center_name(&id).to_string();
    Ok(Json(CenterNameResponse { id, name }))
}
