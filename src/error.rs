use std::collections::BTreeMap;

use thiserror::Error;

/// Message shown under the `email` field when verification fails.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "These credentials do not match our records.";

/// Message shown under the `email` field when the subject's role is not one we dispatch on.
pub const UNRECOGNIZED_ROLE_MESSAGE: &str = "role not recognized";

/// StoreError
///
/// Failures raised by a session store backend. These are infrastructure failures,
/// not user-correctable conditions.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// VerifyError
///
/// Outcome of a failed credential check against the subject store.
/// Unknown identifiers and wrong secrets collapse into `InvalidCredentials`.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("subject store unavailable: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for VerifyError {
    fn from(err: sqlx::Error) -> Self {
        VerifyError::Backend(err.to_string())
    }
}

/// Raised when a stored role string is outside the closed `Role` set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

/// AuthError
///
/// The error taxonomy of the Session Authenticator.
/// `InvalidCredentials` and `UnrecognizedRole` are user-facing and rendered inline
/// on the login form. The remaining variants are infrastructure failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The session has already been force-terminated when this is returned.
    #[error("role not recognized")]
    UnrecognizedRole,
    #[error("credential verification failed: {0}")]
    Verifier(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// field_errors
    ///
    /// Field-scoped messages for the login form, keyed by input name.
    /// Returns `None` for infrastructure failures, which are never shown inline.
    pub fn field_errors(&self) -> Option<BTreeMap<String, String>> {
        let message = match self {
            AuthError::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE,
            AuthError::UnrecognizedRole => UNRECOGNIZED_ROLE_MESSAGE,
            AuthError::Verifier(_) | AuthError::Store(_) => return None,
        };
        Some(BTreeMap::from([("email".to_string(), message.to_string())]))
    }
}
