use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    models::Role,
    session::{AuthState, INTENDED_KEY, Session, SessionContext},
};

/// Why a gate turned a request away. Every variant renders as 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No authenticated session.
    Unauthenticated,
    /// Authenticated, but the subject's email was not verified at login.
    Unverified,
    /// Authenticated with a role other than the one required.
    Forbidden,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (StatusCode::FORBIDDEN, "Unauthorized").into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject(Rejection),
}

/// authorize
///
/// The role gate predicate: allows iff the session is authenticated and its role
/// equals `required` exactly. Anonymous sessions are rejected as `Forbidden`.
pub fn authorize(session: &Session, required: Role) -> GateDecision {
    match session.auth() {
        AuthState::Authenticated { role, .. } if role == required => GateDecision::Allow,
        _ => GateDecision::Reject(Rejection::Forbidden),
    }
}

/// Gate
///
/// One independent link of a guard chain. Gates only inspect the session; any
/// bookkeeping on rejection happens in `enforce`.
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, session: &Session) -> GateDecision;
}

/// Requires an authenticated session.
pub struct Authenticated;

impl Gate for Authenticated {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn check(&self, session: &Session) -> GateDecision {
        if session.is_authenticated() {
            GateDecision::Allow
        } else {
            GateDecision::Reject(Rejection::Unauthenticated)
        }
    }
}

/// Requires a subject whose email was verified when the session was established.
pub struct Verified;

impl Gate for Verified {
    fn name(&self) -> &'static str {
        "verified"
    }

    fn check(&self, session: &Session) -> GateDecision {
        match session.auth() {
            AuthState::Authenticated { verified: true, .. } => GateDecision::Allow,
            _ => GateDecision::Reject(Rejection::Unverified),
        }
    }
}

/// Requires an exact role match (see `authorize`).
pub struct RoleGate(pub Role);

impl Gate for RoleGate {
    fn name(&self) -> &'static str {
        "role"
    }

    fn check(&self, session: &Session) -> GateDecision {
        authorize(session, self.0)
    }
}

/// GateChain
///
/// An ordered list of gates evaluated front to back. The first rejection wins and
/// later gates are not consulted.
#[derive(Clone, Default)]
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    /// The chain guarding role pages: authenticated → verified → role.
    pub fn for_role(role: Role) -> Self {
        Self::new()
            .with(Authenticated)
            .with(Verified)
            .with(RoleGate(role))
    }

    pub fn check(&self, session: &Session) -> GateDecision {
        for gate in &self.gates {
            if let GateDecision::Reject(rejection) = gate.check(session) {
                tracing::debug!(gate = gate.name(), ?rejection, "gate rejected request");
                return GateDecision::Reject(rejection);
            }
        }
        GateDecision::Allow
    }
}

/// enforce
///
/// Route-layer middleware running a `GateChain` against the current session.
/// Allowed requests are forwarded unchanged. When an anonymous caller is turned
/// away from a GET, the requested path is remembered so a later login can send
/// them back to it.
pub async fn enforce(
    State(chain): State<GateChain>,
    OriginalUri(uri): OriginalUri,
    session: SessionContext,
    request: Request,
    next: Next,
) -> Response {
    let decision = {
        let mut session = session.lock().await;
        let decision = chain.check(&session);
        if decision == GateDecision::Reject(Rejection::Unauthenticated)
            && request.method() == Method::GET
        {
            let intended = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| uri.path());
            session.insert(INTENDED_KEY, intended);
        }
        decision
    };

    match decision {
        GateDecision::Allow => next.run(request).await,
        GateDecision::Reject(rejection) => {
            tracing::info!(uri = %uri, ?rejection, "access denied");
            rejection.into_response()
        }
    }
}
