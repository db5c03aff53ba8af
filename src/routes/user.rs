use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// User Router Module
///
/// Pages for the `user` role. `create_router` wraps this router in the
/// authenticated → verified → role:user gate chain.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // GET /dashboard
        .route("/dashboard", get(handlers::user_dashboard))
}
