use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Pages exclusively for the `admin` role, nested under `/admin`.
///
/// Access Control:
/// `create_router` wraps this router in the authenticated → verified → role:admin
/// gate chain before nesting it, so every route added here is covered.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/dashboard
        .route("/dashboard", get(handlers::admin_dashboard))
}
