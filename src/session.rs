use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, types::Json};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{AppState, error::StoreError, models::Role};

/// Session attribute holding the path an anonymous caller was turned away from.
pub const INTENDED_KEY: &str = "url.intended";

/// Session attribute holding a one-shot status message for the login page.
pub const STATUS_KEY: &str = "status";

/// Request header that must echo the session token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// 256 bits drawn from two v4 UUIDs, hex encoded.
fn random_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

// --- Session Model ---

/// SessionId
///
/// The opaque identifier carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// AuthState
///
/// A session is either fully anonymous or authenticated as exactly one subject
/// with exactly one role. The role is copied from the subject record at login and
/// is not re-read afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Anonymous,
    Authenticated {
        subject_id: Uuid,
        role: Role,
        verified: bool,
    },
}

/// Session
///
/// Request-scoped view of one server-side session. Mutations are local until the
/// owning `SessionStore` persists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    token: String,
    auth: AuthState,
    attributes: BTreeMap<String, serde_json::Value>,
    expires_at: DateTime<Utc>,
    /// Set by every mutation, cleared when a store persists the session.
    #[serde(skip)]
    modified: bool,
}

impl Session {
    /// A fresh anonymous session with new identifier and token.
    pub fn new(lifetime: TimeDelta) -> Self {
        Self {
            id: SessionId::generate(),
            token: random_token(),
            auth: AuthState::Anonymous,
            attributes: BTreeMap::new(),
            expires_at: Utc::now() + lifetime,
            modified: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Hands the token out to the client. A session whose token is out there has
    /// to be kept, so this counts as a modification.
    pub fn issue_token(&mut self) -> &str {
        self.modified = true;
        &self.token
    }

    /// Whether anything changed since the session was started, loaded or last saved.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn auth(&self) -> AuthState {
        self.auth
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated { .. })
    }

    pub fn subject_id(&self) -> Option<Uuid> {
        match self.auth {
            AuthState::Authenticated { subject_id, .. } => Some(subject_id),
            AuthState::Anonymous => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self.auth {
            AuthState::Authenticated { role, .. } => Some(role),
            AuthState::Anonymous => None,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn mark_authenticated(&mut self, subject_id: Uuid, role: Role, verified: bool) {
        self.modified = true;
        self.auth = AuthState::Authenticated {
            subject_id,
            role,
            verified,
        };
    }

    pub fn clear_authentication(&mut self) {
        self.modified = true;
        self.auth = AuthState::Anonymous;
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.modified = true;
        self.attributes.insert(key.to_string(), value.into());
    }

    /// Removes and returns an attribute (read-once semantics).
    pub fn pull(&mut self, key: &str) -> Option<serde_json::Value> {
        let value = self.attributes.remove(key);
        self.modified |= value.is_some();
        value
    }

    /// Extends the expiry and clears the modified flag. Stores call this on save.
    fn mark_persisted(&mut self, lifetime: TimeDelta) {
        self.expires_at = Utc::now() + lifetime;
        self.modified = false;
    }

    fn replace_token(&mut self) {
        self.modified = true;
        self.token = random_token();
    }

    /// Swaps in a new identifier and returns the one it replaced.
    fn reassign_id(&mut self) -> SessionId {
        self.modified = true;
        std::mem::replace(&mut self.id, SessionId::generate())
    }

    /// Drops all state, assigns a new identifier, returns the replaced one.
    fn reset(&mut self) -> SessionId {
        self.auth = AuthState::Anonymous;
        self.attributes.clear();
        self.reassign_id()
    }
}

// --- Session Store Contract ---

/// SessionStore
///
/// Durable backing for sessions across requests. Implementations are expected to
/// make `save` and `delete` atomic per session id; no locking happens above them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// How long a session stays loadable after its last save.
    fn lifetime(&self) -> TimeDelta;

    /// Returns `None` for unknown or expired ids.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Persists the session under its current id and extends its expiry.
    async fn save(&self, session: &mut Session) -> Result<(), StoreError>;

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    /// A new, unsaved anonymous session.
    fn start(&self) -> Session {
        Session::new(self.lifetime())
    }

    /// regenerate
    ///
    /// Issues a new identifier for the session, keeping its attributes, and removes
    /// the record stored under the old identifier so it can no longer be loaded.
    async fn regenerate(&self, session: &mut Session) -> Result<(), StoreError> {
        let stale = session.reassign_id();
        self.delete(&stale).await?;
        self.save(session).await
    }

    /// invalidate
    ///
    /// Flushes all session state and moves it to a new identifier. The in-memory
    /// session is reset even when removing the old record fails.
    async fn invalidate(&self, session: &mut Session) -> Result<(), StoreError> {
        let stale = session.reset();
        self.delete(&stale).await
    }

    async fn rotate_token(&self, session: &mut Session) -> Result<(), StoreError> {
        session.replace_token();
        Ok(())
    }
}

/// SessionStoreState
///
/// The concrete type used to share the session store across the application state.
pub type SessionStoreState = Arc<dyn SessionStore>;

// --- In-Memory Implementation ---

/// MemorySessionStore
///
/// Process-local store used by tests and single-instance local runs.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    lifetime: TimeDelta,
}

impl MemorySessionStore {
    pub fn new(lifetime: TimeDelta) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired sessions. Returns the number removed.
    pub fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        // A poisoned lock only means another request panicked mid-write; the map is still usable.
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(id).filter(|s| !s.is_expired()).cloned())
    }

    async fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        session.mark_persisted(self.lifetime);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, stored| !stored.is_expired());
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id);
        Ok(())
    }
}

// --- Postgres Implementation ---

/// PostgresSessionStore
///
/// Stores each session as a JSONB payload in the `sessions` table. Expired rows are
/// ignored on load and removed by `prune_expired`, which `spawn_pruner` runs on an
/// interval.
pub struct PostgresSessionStore {
    pool: PgPool,
    lifetime: TimeDelta,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool, lifetime: TimeDelta) -> Self {
        Self { pool, lifetime }
    }

    /// Removes expired rows. Returns the number deleted.
    pub async fn prune_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// spawn_pruner
    ///
    /// Runs `prune_expired` every `every`, starting immediately. Failures are logged
    /// and retried on the next tick.
    pub fn spawn_pruner(self: Arc<Self>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.prune_expired().await {
                    Ok(0) => {}
                    Ok(pruned) => tracing::info!("Pruned {} expired sessions", pruned),
                    Err(e) => tracing::warn!("Could not prune expired sessions: {}", e),
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<(Json<Session>,)> =
            sqlx::query_as("SELECT payload FROM sessions WHERE id = $1 AND expires_at > now()")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(session),)| session))
    }

    async fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        session.mark_persisted(self.lifetime);
        sqlx::query(
            r#"
            INSERT INTO sessions (id, payload, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.id.as_str())
        .bind(Json(&*session))
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// --- Request-Scoped Handle ---

/// SessionContext
///
/// The session of the current request, injected by `session_layer`. Handlers and
/// gates receive it explicitly through this extractor rather than reaching for any
/// global state.
#[derive(Clone)]
pub struct SessionContext(Arc<Mutex<Session>>);

impl SessionContext {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().await
    }
}

impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Missing means the router was assembled without `session_layer`.
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// session_layer
///
/// Loads the caller's session from the cookie (or starts a new one), makes it
/// available to the rest of the chain, then persists it and re-issues the cookie
/// whenever the session identifier changed. A session started for this request is
/// only persisted once something modified it, so cookieless traffic leaves no rows.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let store = &state.sessions;
    let cookie_name = state.config.session_cookie.as_str();

    let incoming = jar.get(cookie_name).map(|c| SessionId::from(c.value()));

    let loaded = match &incoming {
        Some(id) => match store.load(id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!("session load failed, starting a new session: {}", e);
                None
            }
        },
        None => None,
    };
    let started = loaded.is_none();
    let session = loaded.unwrap_or_else(|| store.start());

    let context = SessionContext::new(session);
    request.extensions_mut().insert(context.clone());

    let mut response = next.run(request).await;

    let mut session = context.lock().await;
    if started && !session.is_modified() {
        return response;
    }
    if let Err(e) = store.save(&mut session).await {
        tracing::error!(session_id = %session.id().as_str(), "session save failed: {}", e);
    }

    if incoming.as_ref() != Some(session.id()) {
        let cookie = Cookie::build((cookie_name.to_string(), session.id().as_str().to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(state.config.secure_cookie)
            .build();

        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("session cookie could not be encoded: {}", e),
        }
    }

    response
}

/// verify_csrf
///
/// Refuses unsafe-method requests whose `X-CSRF-TOKEN` header does not match the
/// session token. Must run inside `session_layer`. The token is handed out on the
/// login page and rotated on logout.
pub async fn verify_csrf(session: SessionContext, request: Request, next: Next) -> Response {
    if request.method().is_safe() {
        return next.run(request).await;
    }

    let expected = session.lock().await.token().to_string();
    let accepted = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|presented| tokens_match(&expected, presented));

    if !accepted {
        tracing::warn!(method = %request.method(), path = %request.uri().path(), "CSRF token mismatch");
        return (StatusCode::FORBIDDEN, "CSRF token mismatch").into_response();
    }

    next.run(request).await
}

/// Length-checked comparison that does not stop at the first differing byte.
fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
