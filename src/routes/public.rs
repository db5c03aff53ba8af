use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without an authenticated session: the informational pages,
/// the login form and its submission, and logout.
///
/// Logout is deliberately ungated: it must succeed for anonymous callers too.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Load balancer check. Returns "ok"; the unmodified session is never persisted.
        .route("/health", get(|| async { "ok" }))
        // GET /, /about, /map, /statistic, /report
        .route("/", get(handlers::home))
        .route("/about", get(handlers::about))
        .route("/map", get(handlers::map))
        .route("/statistic", get(handlers::statistic))
        .route("/report", get(handlers::report))
        // GET /login renders the form, POST /login authenticates.
        .route("/login", get(handlers::login_page).post(handlers::login))
        // POST /logout
        .route("/logout", post(handlers::logout))
}
