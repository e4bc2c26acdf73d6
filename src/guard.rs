use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    auth::{SessionBackend, SessionState, authorize, session_token},
    models::SessionUser,
    routes::{self, RouteMeta},
};

/// NavigationDecision
///
/// Outcome of guarding one page navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Render the target. Carries the user with freshly refreshed claims when the route
    /// required authentication, the unrefreshed user (if any) otherwise.
    Proceed(Option<SessionUser>),
    RedirectToLogin,
    RedirectToHome,
}

/// evaluate
///
/// Decides a navigation to a route with `meta` for the session user (if any).
///
/// Routes that require authentication always trigger a forced claims refresh; a
/// failed refresh is treated as "not signed in". A role requirement is checked
/// against the refreshed claims only. There are no retries: the next navigation
/// tries again.
pub async fn evaluate(
    meta: &RouteMeta,
    user: Option<SessionUser>,
    sessions: &dyn SessionBackend,
) -> NavigationDecision {
    if !meta.requires_auth {
        return NavigationDecision::Proceed(user);
    }

    let Some(mut user) = user else {
        tracing::info!("Router Guard: Not authenticated. Redirecting to login.");
        return NavigationDecision::RedirectToLogin;
    };

    let claims = match sessions.refresh_claims(&user).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::error!(uid = %user.uid, "Router Guard: Error refreshing claims: {}", e);
            return NavigationDecision::RedirectToLogin;
        }
    };

    if let Some(required) = &meta.requires_role {
        if !authorize(claims.role.as_ref(), required) {
            tracing::info!(
                uid = %user.uid,
                "Router Guard: Access denied. User role '{}' is not '{}'. Redirecting to home.",
                claims.role.as_ref().map(|role| role.as_str()).unwrap_or("none"),
                required
            );
            return NavigationDecision::RedirectToHome;
        }
    }

    user.claims = Some(claims);
    NavigationDecision::Proceed(Some(user))
}

/// navigation_guard
///
/// Middleware run before every request. Paths that are page routes are decided by
/// [`evaluate`]; anything else (API, health, unknown paths) passes through untouched.
/// On `Proceed` the resolved user is made available to the page handler as a request
/// extension.
pub async fn navigation_guard(
    State(sessions): State<SessionState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(route) = routes::find_route(request.uri().path()) else {
        return next.run(request).await;
    };

    let from = request
        .headers()
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    tracing::debug!(to = route.name, %from, "guarding navigation");

    let user = match session_token(request.headers()) {
        Some(token) => sessions.current_user(&token).await,
        None => None,
    };

    match evaluate(&route.meta, user, sessions.as_ref()).await {
        NavigationDecision::Proceed(user) => {
            if let Some(user) = user {
                request.extensions_mut().insert(user);
            }
            next.run(request).await
        }
        NavigationDecision::RedirectToLogin => redirect_to(routes::LOGIN),
        NavigationDecision::RedirectToHome => redirect_to(routes::HOME),
    }
}

fn redirect_to(name: &str) -> Response {
    let path = routes::path_of(name).unwrap_or_else(|| "/".to_string());
    Redirect::to(&path).into_response()
}
