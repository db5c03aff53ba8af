use std::str::FromStr;

use axum::extract::FromRef;

use crate::{
    AppState,
    error::{AuthError, VerifyError},
    models::{Credentials, LoginPageProps, Role},
    repository::SubjectVerifierState,
    routes::{RouteTable, names},
    session::{INTENDED_KEY, STATUS_KEY, Session, SessionStoreState},
};

/// LoginOutcome
///
/// A successful login: the resolved path to redirect to and the role the session
/// was established with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub destination: String,
    pub role: Role,
}

/// Authenticator
///
/// Establishes and tears down authenticated sessions. It holds no per-request
/// state: every operation receives the caller's session explicitly and mutates it
/// through the session store.
#[derive(Clone)]
pub struct Authenticator {
    subjects: SubjectVerifierState,
    sessions: SessionStoreState,
    routes: RouteTable,
}

impl FromRef<AppState> for Authenticator {
    fn from_ref(state: &AppState) -> Self {
        Authenticator::new(
            state.subjects.clone(),
            state.sessions.clone(),
            state.routes.clone(),
        )
    }
}

impl Authenticator {
    pub fn new(
        subjects: SubjectVerifierState,
        sessions: SessionStoreState,
        routes: RouteTable,
    ) -> Self {
        Self {
            subjects,
            sessions,
            routes,
        }
    }

    /// authenticate
    ///
    /// The login flow:
    /// 1. Verify the credentials. A failure returns `InvalidCredentials` before the
    ///    session is touched.
    /// 2. Regenerate the session identifier so no pre-login id survives the login.
    /// 3. Dispatch on the subject's role. `admin` and `user` are established and sent
    ///    to the recorded intended destination, or their dashboard when none was
    ///    recorded.
    /// 4. Any other role ends the session (invalidated, token rotated) and returns
    ///    `UnrecognizedRole`. Such a subject never keeps an authenticated session.
    pub async fn authenticate(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> Result<LoginOutcome, AuthError> {
        // 1. Credential Verification
        let subject = match self.subjects.verify(credentials).await {
            Ok(subject) => subject,
            Err(VerifyError::InvalidCredentials) => {
                tracing::warn!("login rejected: invalid credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(VerifyError::Backend(e)) => {
                tracing::error!("subject store failure during login: {}", e);
                return Err(AuthError::Verifier(e));
            }
        };

        // 2. Anti-fixation
        self.sessions.regenerate(session).await?;

        // 3. Role Dispatch
        let role = match Role::from_str(&subject.role) {
            Ok(role) => role,
            Err(unknown) => {
                tracing::warn!(
                    subject_id = %subject.id,
                    "login refused: {}; terminating session",
                    unknown
                );
                self.end_session(session).await;
                return Err(AuthError::UnrecognizedRole);
            }
        };

        session.mark_authenticated(subject.id, role, subject.is_verified());
        let destination = self.intended_or(session, role.dashboard_route());

        tracing::info!(
            subject_id = %subject.id,
            role = %role,
            destination = %destination,
            "login succeeded"
        );

        Ok(LoginOutcome { destination, role })
    }

    /// logout
    ///
    /// Ends the session unconditionally and returns the path of the public root.
    /// Idempotent: logging out an anonymous session still rotates its id and token.
    pub async fn logout(&self, session: &mut Session) -> String {
        if let Some(subject_id) = session.subject_id() {
            tracing::info!(subject_id = %subject_id, "logout");
        }
        self.end_session(session).await;
        self.routes.resolve(names::HOME).to_string()
    }

    /// login_page
    ///
    /// Props for the login form. The status message is read once and then dropped.
    pub fn login_page(&self, session: &mut Session) -> LoginPageProps {
        let status = session
            .pull(STATUS_KEY)
            .and_then(|value| value.as_str().map(str::to_owned));

        LoginPageProps {
            can_reset_password: self.routes.has(names::PASSWORD_REQUEST),
            status,
            csrf_token: session.issue_token().to_string(),
            errors: Default::default(),
        }
    }

    /// Clears authentication, invalidates the stored session and rotates its token.
    /// Store failures are logged; the in-memory session is anonymous regardless.
    async fn end_session(&self, session: &mut Session) {
        session.clear_authentication();
        if let Err(e) = self.sessions.invalidate(session).await {
            tracing::warn!("session invalidation incomplete: {}", e);
        }
        if let Err(e) = self.sessions.rotate_token(session).await {
            tracing::warn!("session token rotation failed: {}", e);
        }
    }

    /// Pulls the intended path if one was recorded, otherwise resolves `fallback`.
    fn intended_or(&self, session: &mut Session, fallback: &str) -> String {
        let intended = session
            .pull(INTENDED_KEY)
            .and_then(|value| value.as_str().map(str::to_owned))
            // Only same-origin paths; never "//host" or absolute URLs.
            .filter(|path| path.starts_with('/') && !path.starts_with("//"));

        intended.unwrap_or_else(|| self.routes.resolve(fallback).to_string())
    }
}
