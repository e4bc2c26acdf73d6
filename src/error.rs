use thiserror::Error;

/// BackendError
///
/// Failures reported by the external collaborators (session service and center
/// document store). Callers never retry: the guard turns these into a redirect to
/// the login route and the center store resets itself to the empty state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached or answered with an unexpected status.
    #[error("backend unreachable: {0}")]
    Network(String),
    /// The session token is no longer accepted (expired, revoked, signed out elsewhere).
    #[error("session revoked")]
    Revoked,
    /// A collection query or live subscription failed (permissions, bad filter, closed listener).
    #[error("query failed: {0}")]
    Query(String),
    /// The backend answered but the payload did not have the expected shape.
    #[error("malformed backend payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        BackendError::Query(e.to_string())
    }
}
