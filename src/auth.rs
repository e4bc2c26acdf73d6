use async_trait::async_trait;
use chrono::DateTime;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    config::AppConfig,
    error::BackendError,
    models::{Claims, Role, SessionUser},
};

// --- Permission Model ---

/// Capability
///
/// A unit of access granted by a role. Routes name the role they require, and the
/// requirement is met when the caller's role carries every capability of that role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewApplicants,
    ViewAllCenters,
    ManageUsers,
    ManageCenters,
    /// Access limited to the centers listed in the caller's claims.
    ScopedToCenters,
}

const SUPERADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ViewApplicants,
    Capability::ViewAllCenters,
    Capability::ManageUsers,
    Capability::ManageCenters,
];

const CENTER_ADMIN_CAPABILITIES: &[Capability] =
    &[Capability::ViewApplicants, Capability::ScopedToCenters];

impl Role {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Superadmin => SUPERADMIN_CAPABILITIES,
            Role::CenterAdmin => CENTER_ADMIN_CAPABILITIES,
            Role::Other(_) => &[],
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// authorize
///
/// The single authorization check used by the navigation guard. There is no role
/// hierarchy: `superadmin` lacks `ScopedToCenters`, so it does not satisfy a route
/// that requires `center_admin`. Roles without capabilities only satisfy themselves.
pub fn authorize(role: Option<&Role>, required: &Role) -> bool {
    let Some(role) = role else {
        return false;
    };

    let needed = required.capabilities();
    if needed.is_empty() {
        return role == required;
    }
    needed.iter().all(|capability| role.has(*capability))
}

// --- Session Port ---

/// SessionBackend
///
/// Contract with the identity service. Implementations must not cache the result of
/// `refresh_claims`: every call is a fresh round trip.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Resolves the user behind a session token. `None` means "not signed in"
    /// (missing, malformed, expired or unknown token). Claims on the returned user are
    /// the ones embedded in the token and may be stale.
    async fn current_user(&self, token: &str) -> Option<SessionUser>;

    /// Forces a claims refresh for `user`, discarding anything cached.
    async fn refresh_claims(&self, user: &SessionUser) -> Result<Claims, BackendError>;
}

/// SessionState
///
/// The concrete type used to share the session backend across the application state.
pub type SessionState = Arc<dyn SessionBackend>;

/// Name of the cookie the SPA host forwards with page navigations.
pub const SESSION_COOKIE: &str = "__session";

/// session_token
///
/// Reads the session token of a request: the `Authorization: Bearer` header first,
/// then the `__session` cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

// --- HTTP Session Backend ---

/// SessionTokenClaims
///
/// Payload of the HS256 session token issued by the identity service.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionTokenClaims {
    /// Subject: the account id.
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub email: Option<String>,
    /// Custom claims as of token issuance.
    #[serde(default)]
    pub app_metadata: Option<Claims>,
}

#[derive(Deserialize)]
struct RefreshedUser {
    #[serde(default)]
    app_metadata: Claims,
}

/// HttpSessionBackend
///
/// Validates session tokens locally with the shared secret and refreshes claims by
/// asking the identity service for the account's current `app_metadata`.
#[derive(Clone)]
pub struct HttpSessionBackend {
    http: reqwest::Client,
    auth_url: String,
    api_key: String,
    decoding_key: DecodingKey,
}

impl HttpSessionBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            api_key: config.auth_api_key.clone(),
            decoding_key: DecodingKey::from_secret(config.session_jwt_secret.as_bytes()),
        }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn current_user(&self, token: &str) -> Option<SessionUser> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        // Audience is fixed by the identity service and carries no information here.
        validation.validate_aud = false;

        let token_data = match decode::<SessionTokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("session token rejected: {:?}", e.kind());
                return None;
            }
        };

        Some(SessionUser {
            uid: token_data.claims.sub,
            email: token_data.claims.email,
            token: token.to_string(),
            claims: token_data.claims.app_metadata,
            expires_at: DateTime::from_timestamp(token_data.claims.exp as i64, 0),
        })
    }

    async fn refresh_claims(&self, user: &SessionUser) -> Result<Claims, BackendError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.auth_url))
            .bearer_auth(&user.token)
            .header("apikey", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Revoked);
        }
        if !status.is_success() {
            return Err(BackendError::Network(format!(
                "identity service answered {}",
                status
            )));
        }

        let refreshed: RefreshedUser = response.json().await?;
        Ok(refreshed.app_metadata)
    }
}

// --- Mock Session Backend ---

/// MockSessionBackend
///
/// In-memory session backend for tests. Tokens map to users; refresh results are
/// scripted per uid and fall back to the user's embedded claims.
#[derive(Default)]
pub struct MockSessionBackend {
    users: Mutex<HashMap<String, SessionUser>>,
    refreshes: Mutex<HashMap<String, Result<Claims, BackendError>>>,
    refresh_calls: AtomicUsize,
}

impl MockSessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `user` under its own token.
    pub fn with_user(self, user: SessionUser) -> Self {
        self.users.lock().insert(user.token.clone(), user);
        self
    }

    /// Scripts the outcome of every claims refresh for `uid`.
    pub fn with_refresh(self, uid: &str, outcome: Result<Claims, BackendError>) -> Self {
        self.refreshes.lock().insert(uid.to_string(), outcome);
        self
    }

    /// Number of claims refreshes served so far.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionBackend for MockSessionBackend {
    async fn current_user(&self, token: &str) -> Option<SessionUser> {
        self.users.lock().get(token).cloned()
    }

    async fn refresh_claims(&self, user: &SessionUser) -> Result<Claims, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        match self.refreshes.lock().get(&user.uid) {
            Some(outcome) => outcome.clone(),
            None => Ok(user.claims.clone().unwrap_or_default()),
        }
    }
}

// --- Extractor ---

/// AuthUser
///
/// The signed-in user behind an API request. Rejects with 401 when the request has no
/// session token or the token does not resolve to a user. Claims on the inner user
/// are the token's (possibly stale) copy.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: SessionUser,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionState: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let sessions = SessionState::from_ref(state);

        let token = session_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        let user = sessions
            .current_user(&token)
            .await
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser { user })
    }
}
