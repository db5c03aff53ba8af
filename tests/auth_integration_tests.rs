use async_trait::async_trait;
use chrono::TimeDelta;
use role_portal::{
    auth::{Authenticator, LoginOutcome},
    error::{AuthError, StoreError, VerifyError},
    models::{Credentials, Role, Subject},
    repository::{MemorySubjectStore, SubjectVerifier},
    routes::RouteTable,
    session::{INTENDED_KEY, MemorySessionStore, STATUS_KEY, Session, SessionId, SessionStore},
};
use std::sync::Arc;

// --- Fixtures ---

const PASSWORD: &str = "correct horse battery staple";

struct Fixture {
    auth: Authenticator,
    subjects: Arc<MemorySubjectStore>,
    sessions: Arc<MemorySessionStore>,
}

fn fixture() -> Fixture {
    let subjects = Arc::new(MemorySubjectStore::new());
    let sessions = Arc::new(MemorySessionStore::new(TimeDelta::minutes(120)));
    let auth = Authenticator::new(subjects.clone(), sessions.clone(), RouteTable::default());
    Fixture {
        auth,
        subjects,
        sessions,
    }
}

fn credentials(email: &str, password: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: password.to_string(),
    }
}

/// A session that already lives in the store, as it would after a first page view.
async fn persisted_session(sessions: &MemorySessionStore) -> Session {
    let mut session = sessions.start();
    sessions.save(&mut session).await.unwrap();
    session
}

// --- Authenticate ---

#[tokio::test]
async fn test_admin_login_redirects_to_admin_dashboard() {
    let fx = fixture();
    let admin = fx.subjects.insert("admin@example.com", PASSWORD, "admin", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;

    let outcome = fx
        .auth
        .authenticate(&mut session, &credentials("admin@example.com", PASSWORD))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        LoginOutcome {
            destination: "/admin/dashboard".to_string(),
            role: Role::Admin,
        }
    );
    assert_eq!(session.role(), Some(Role::Admin));
    assert_eq!(session.subject_id(), Some(admin.id));
}

#[tokio::test]
async fn test_user_login_redirects_to_user_dashboard() {
    let fx = fixture();
    fx.subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;

    let outcome = fx
        .auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await
        .unwrap();

    assert_eq!(outcome.destination, "/dashboard");
    assert_eq!(outcome.role, Role::User);
    assert_eq!(session.role(), Some(Role::User));
}

#[tokio::test]
async fn test_login_regenerates_session_id() {
    let fx = fixture();
    fx.subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    let pre_login_id = session.id().clone();

    fx.auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await
        .unwrap();

    assert_ne!(session.id(), &pre_login_id);
    // The pre-login id can no longer be used to reach the session.
    assert!(fx.sessions.load(&pre_login_id).await.unwrap().is_none());
    assert!(fx.sessions.contains(session.id()));
}

#[tokio::test]
async fn test_intended_destination_overrides_dashboard() {
    let fx = fixture();
    fx.subjects.insert("admin@example.com", PASSWORD, "admin", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    session.insert(INTENDED_KEY, "/admin/dashboard?tab=reports");

    let outcome = fx
        .auth
        .authenticate(&mut session, &credentials("admin@example.com", PASSWORD))
        .await
        .unwrap();

    assert_eq!(outcome.destination, "/admin/dashboard?tab=reports");
    // The intended destination is consumed by the login.
    assert!(session.get(INTENDED_KEY).is_none());
}

#[tokio::test]
async fn test_intended_destination_must_be_a_local_path() {
    let fx = fixture();
    fx.subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    session.insert(INTENDED_KEY, "//evil.example.com/phish");

    let outcome = fx
        .auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await
        .unwrap();

    assert_eq!(outcome.destination, "/dashboard");
}

#[tokio::test]
async fn test_invalid_password_leaves_session_untouched() {
    let fx = fixture();
    fx.subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    session.insert(INTENDED_KEY, "/dashboard");
    let before = session.clone();

    let result = fx
        .auth
        .authenticate(&mut session, &credentials("user@example.com", "wrong"))
        .await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(session, before);
    assert!(fx.sessions.contains(before.id()));
}

#[tokio::test]
async fn test_unknown_email_is_invalid_credentials() {
    let fx = fixture();
    let mut session = persisted_session(&fx.sessions).await;
    let before = session.clone();

    let result = fx
        .auth
        .authenticate(&mut session, &credentials("nobody@example.com", PASSWORD))
        .await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(session, before);
}

#[tokio::test]
async fn test_unrecognized_role_forces_logout() {
    let fx = fixture();
    fx.subjects.insert("guest@example.com", PASSWORD, "guest", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    session.insert(INTENDED_KEY, "/admin/dashboard");
    let pre_login_id = session.id().clone();
    let pre_login_token = session.token().to_string();

    let result = fx
        .auth
        .authenticate(&mut session, &credentials("guest@example.com", PASSWORD))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::UnrecognizedRole));
    assert_eq!(
        err.field_errors().unwrap().get("email").map(String::as_str),
        Some("role not recognized")
    );

    assert!(!session.is_authenticated());
    assert_eq!(session.role(), None);
    assert_ne!(session.id(), &pre_login_id);
    assert_ne!(session.token(), pre_login_token);
    // All pre-login state, including the intended destination, is gone.
    assert!(session.get(INTENDED_KEY).is_none());
    assert!(fx.sessions.load(&pre_login_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_role_match_is_case_sensitive() {
    let fx = fixture();
    fx.subjects.insert("shouty@example.com", PASSWORD, "Admin", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;

    let result = fx
        .auth
        .authenticate(&mut session, &credentials("shouty@example.com", PASSWORD))
        .await;

    assert!(matches!(result, Err(AuthError::UnrecognizedRole)));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_role_on_session_is_not_refreshed_after_login() {
    let fx = fixture();
    fx.subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;

    fx.auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await
        .unwrap();

    // A role change in the subject store does not reach an existing session.
    assert!(fx.subjects.set_role("user@example.com", "admin"));
    fx.sessions.save(&mut session).await.unwrap();
    let reloaded = fx.sessions.load(session.id()).await.unwrap().unwrap();
    assert_eq!(reloaded.role(), Some(Role::User));
}

// --- Logout ---

#[tokio::test]
async fn test_logout_invalidates_and_rotates() {
    let fx = fixture();
    fx.subjects.insert("admin@example.com", PASSWORD, "admin", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;
    fx.auth
        .authenticate(&mut session, &credentials("admin@example.com", PASSWORD))
        .await
        .unwrap();
    fx.sessions.save(&mut session).await.unwrap();

    let logged_in_id = session.id().clone();
    let logged_in_token = session.token().to_string();

    let destination = fx.auth.logout(&mut session).await;

    assert_eq!(destination, "/");
    assert!(!session.is_authenticated());
    assert_ne!(session.id(), &logged_in_id);
    assert_ne!(session.token(), logged_in_token);
    assert!(fx.sessions.load(&logged_in_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_logout_is_idempotent_for_anonymous_sessions() {
    let fx = fixture();
    let mut session = persisted_session(&fx.sessions).await;

    let first_id = session.id().clone();
    assert_eq!(fx.auth.logout(&mut session).await, "/");
    let second_id = session.id().clone();
    let second_token = session.token().to_string();
    assert_eq!(fx.auth.logout(&mut session).await, "/");

    assert_ne!(first_id, second_id);
    assert_ne!(session.id(), &second_id);
    assert_ne!(session.token(), second_token);
    assert!(!session.is_authenticated());
}

/// A store whose deletes always fail.
struct BrokenDeleteStore(MemorySessionStore);

#[async_trait]
impl SessionStore for BrokenDeleteStore {
    fn lifetime(&self) -> TimeDelta {
        self.0.lifetime()
    }
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.0.load(id).await
    }
    async fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        self.0.save(session).await
    }
    async fn delete(&self, _id: &SessionId) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn test_logout_succeeds_even_when_store_fails() {
    let subjects = Arc::new(MemorySubjectStore::new());
    let sessions = Arc::new(BrokenDeleteStore(MemorySessionStore::new(TimeDelta::minutes(5))));
    let auth = Authenticator::new(subjects, sessions.clone(), RouteTable::default());

    let mut session = sessions.start();
    session.mark_authenticated(uuid::Uuid::new_v4(), Role::Admin, true);
    let old_id = session.id().clone();

    let destination = auth.logout(&mut session).await;

    assert_eq!(destination, "/");
    assert!(!session.is_authenticated());
    assert_ne!(session.id(), &old_id);
}

#[tokio::test]
async fn test_login_surfaces_session_store_failure() {
    let subjects = Arc::new(MemorySubjectStore::new());
    subjects.insert("user@example.com", PASSWORD, "user", true).unwrap();
    let sessions = Arc::new(BrokenDeleteStore(MemorySessionStore::new(TimeDelta::minutes(5))));
    let auth = Authenticator::new(subjects, sessions.clone(), RouteTable::default());
    let mut session = sessions.start();

    let result = auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::Store(_)));
    assert!(err.field_errors().is_none());
}

/// A verifier whose backend is down.
struct UnavailableVerifier;

#[async_trait]
impl SubjectVerifier for UnavailableVerifier {
    async fn verify(&self, _credentials: &Credentials) -> Result<Subject, VerifyError> {
        Err(VerifyError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_verifier_outage_is_not_reported_as_bad_credentials() {
    let sessions = Arc::new(MemorySessionStore::new(TimeDelta::minutes(5)));
    let auth = Authenticator::new(
        Arc::new(UnavailableVerifier),
        sessions.clone(),
        RouteTable::default(),
    );
    let mut session = sessions.start();
    let before = session.clone();

    let result = auth
        .authenticate(&mut session, &credentials("user@example.com", PASSWORD))
        .await;

    assert!(matches!(result, Err(AuthError::Verifier(_))));
    assert_eq!(session, before);
}

// --- Login Page ---

#[tokio::test]
async fn test_login_page_reads_status_once() {
    let fx = fixture();
    let mut session = persisted_session(&fx.sessions).await;
    session.insert(STATUS_KEY, "Your password has been reset.");

    let first = fx.auth.login_page(&mut session);
    let second = fx.auth.login_page(&mut session);

    assert_eq!(first.status.as_deref(), Some("Your password has been reset."));
    assert_eq!(second.status, None);
    assert_eq!(first.csrf_token, session.token());
    assert!(!first.can_reset_password);
}

#[tokio::test]
async fn test_login_page_offers_password_reset_when_routed() {
    let subjects = Arc::new(MemorySubjectStore::new());
    let sessions = Arc::new(MemorySessionStore::new(TimeDelta::minutes(5)));
    let auth = Authenticator::new(subjects, sessions.clone(), RouteTable::new(true));
    let mut session = sessions.start();

    assert!(auth.login_page(&mut session).can_reset_password);
}

// --- Logging ---

/// In-memory sink for the formatted log lines of one test.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[tokio::test]
async fn test_failed_login_does_not_log_the_submitted_email() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let fx = fixture();
    fx.subjects.insert("known@example.com", PASSWORD, "user", true).unwrap();
    let mut session = persisted_session(&fx.sessions).await;

    for email in ["known@example.com", "stranger@example.com"] {
        let result = fx
            .auth
            .authenticate(&mut session, &credentials(email, "wrong"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    let output = logs.contents();
    assert!(output.contains("login rejected: invalid credentials"));
    assert!(!output.contains("example.com"));
}
