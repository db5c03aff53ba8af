use chrono::TimeDelta;
use role_portal::{
    gate::{Authenticated, Gate, GateChain, GateDecision, Rejection, RoleGate, Verified, authorize},
    models::Role,
    session::Session,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use uuid::Uuid;

fn anonymous() -> Session {
    Session::new(TimeDelta::minutes(5))
}

fn authenticated(role: Role, verified: bool) -> Session {
    let mut session = anonymous();
    session.mark_authenticated(Uuid::new_v4(), role, verified);
    session
}

const ROLES: [Role; 2] = [Role::Admin, Role::User];

#[test]
fn test_authorize_truth_table() {
    for required in ROLES {
        assert_eq!(
            authorize(&anonymous(), required),
            GateDecision::Reject(Rejection::Forbidden),
            "anonymous must never pass role:{required}"
        );

        for held in ROLES {
            let expected = if held == required {
                GateDecision::Allow
            } else {
                GateDecision::Reject(Rejection::Forbidden)
            };
            assert_eq!(
                authorize(&authenticated(held, true), required),
                expected,
                "held {held}, required {required}"
            );
        }
    }
}

#[test]
fn test_admin_does_not_pass_user_gate() {
    // No role hierarchy.
    assert_eq!(
        RoleGate(Role::User).check(&authenticated(Role::Admin, true)),
        GateDecision::Reject(Rejection::Forbidden)
    );
}

#[test]
fn test_authenticated_gate() {
    assert_eq!(
        Authenticated.check(&anonymous()),
        GateDecision::Reject(Rejection::Unauthenticated)
    );
    assert_eq!(
        Authenticated.check(&authenticated(Role::User, false)),
        GateDecision::Allow
    );
}

#[test]
fn test_verified_gate() {
    assert_eq!(
        Verified.check(&authenticated(Role::User, true)),
        GateDecision::Allow
    );
    assert_eq!(
        Verified.check(&authenticated(Role::User, false)),
        GateDecision::Reject(Rejection::Unverified)
    );
    assert_eq!(
        Verified.check(&anonymous()),
        GateDecision::Reject(Rejection::Unverified)
    );
}

#[test]
fn test_role_chain_reports_first_failing_gate() {
    let chain = GateChain::for_role(Role::Admin);

    assert_eq!(
        chain.check(&anonymous()),
        GateDecision::Reject(Rejection::Unauthenticated)
    );
    assert_eq!(
        chain.check(&authenticated(Role::Admin, false)),
        GateDecision::Reject(Rejection::Unverified)
    );
    assert_eq!(
        chain.check(&authenticated(Role::User, true)),
        GateDecision::Reject(Rejection::Forbidden)
    );
    assert_eq!(
        chain.check(&authenticated(Role::Admin, true)),
        GateDecision::Allow
    );
}

/// Counts how often it is consulted and always allows.
struct CountingGate(Arc<AtomicUsize>);

impl Gate for CountingGate {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn check(&self, _session: &Session) -> GateDecision {
        self.0.fetch_add(1, Ordering::SeqCst);
        GateDecision::Allow
    }
}

#[test]
fn test_chain_short_circuits_on_rejection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = GateChain::new()
        .with(Authenticated)
        .with(CountingGate(calls.clone()));

    assert_eq!(
        chain.check(&anonymous()),
        GateDecision::Reject(Rejection::Unauthenticated)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(chain.check(&authenticated(Role::User, true)), GateDecision::Allow);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_empty_chain_allows() {
    assert_eq!(GateChain::new().check(&anonymous()), GateDecision::Allow);
}
