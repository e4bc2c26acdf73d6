use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Identity & Claims ---

/// Role
///
/// The role claim carried by a session. Parsing is exact string equality: anything
/// that is not `superadmin` or `center_admin` is kept verbatim as `Other` and grants
/// no capabilities (see `auth::authorize`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Superadmin,
    CenterAdmin,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Superadmin => "superadmin",
            Role::CenterAdmin => "center_admin",
            Role::Other(raw) => raw,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "superadmin" => Role::Superadmin,
            "center_admin" => Role::CenterAdmin,
            _ => Role::Other(raw),
        }
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        Role::from(raw.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims
///
/// Custom claims attached to a session by the identity backend. The copy embedded in a
/// session token can be stale; only claims obtained through a forced refresh are
/// used for authorization decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, alias = "centerIds")]
    pub center_ids: Vec<String>,
}

impl Claims {
    pub fn is_superadmin(&self) -> bool {
        self.role == Some(Role::Superadmin)
    }
}

/// SessionUser
///
/// The authenticated user behind a request, as resolved by the session backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// Stable identity of the account at the identity backend.
    pub uid: String,
    pub email: Option<String>,
    /// The raw session token, forwarded on claims refresh.
    pub token: String,
    /// `None` when the identity backend attached no custom claims to the account.
    pub claims: Option<Claims>,
    /// When the session token stops being accepted. `None` if the backend did not say.
    pub expires_at: Option<DateTime<Utc>>,
}

// --- Centers ---

/// Center
///
/// An organizational center, mirrored from the `centers` collection. Any field other
/// than `id` and `name` is carried untouched in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Center {
    pub id: String,
    pub name: String,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    #[schema(value_type = Object)]
    pub details: Map<String, Value>,
}

/// The wire form of `CenterSelection::All`.
pub const ALL_CENTERS: &str = "all";

/// CenterSelection
///
/// The active center filter: every accessible center, or one specific center id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CenterSelection {
    #[default]
    All,
    Center(String),
}

impl From<String> for CenterSelection {
    fn from(raw: String) -> Self {
        if raw == ALL_CENTERS {
            CenterSelection::All
        } else {
            CenterSelection::Center(raw)
        }
    }
}

impl From<&str> for CenterSelection {
    fn from(raw: &str) -> Self {
        CenterSelection::from(raw.to_string())
    }
}

impl From<CenterSelection> for String {
    fn from(selection: CenterSelection) -> Self {
        match selection {
            CenterSelection::All => ALL_CENTERS.to_string(),
            CenterSelection::Center(id) => id,
        }
    }
}

// --- API Payloads ---

/// CenterStoreView
///
/// Read model of a user's center store, returned by `GET /api/centers`.
/// The derived flags are recomputed from the store state on every request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CenterStoreView {
    /// Either `"all"` or the id of one accessible center.
    #[schema(example = "all")]
    pub selected_center_id: String,
    pub centers: Vec<Center>,
    pub show_center_filter: bool,
    pub is_specific_center_selected: bool,
    pub is_superadmin: bool,
}

/// SelectCenterRequest
///
/// Input payload for `PUT /api/centers/selected`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SelectCenterRequest {
    #[schema(example = "all")]
    pub center_id: String,
}

/// CenterNameResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CenterNameResponse {
    pub id: String,
    pub name: String,
}

/// SessionSummary
///
/// Output of `POST /api/session/sign-in`: the identity and the freshly refreshed claims
/// the center store was initialized with.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionSummary {
    pub uid: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub center_ids: Vec<String>,
}

/// RouteEntry
///
/// One row of the flattened route table exposed at `GET /api/routes`. Paths are the
/// full paths, children carry the name of their parent route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RouteEntry {
    pub path: String,
    pub name: String,
    pub parent: Option<String>,
    pub requires_auth: bool,
    pub requires_role: Option<String>,
}
