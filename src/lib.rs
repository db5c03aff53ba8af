use axum::{Router, http::HeaderName, middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Session authorization core.
pub mod auth;
pub mod gate;
pub mod session;

// Collaborators and HTTP surface.
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, User, Admin).
pub mod routes;
use gate::GateChain;
use models::Role;
use routes::{RouteTable, admin, public, user};

// --- Public Re-exports ---

pub use auth::Authenticator;
pub use config::AppConfig;
pub use repository::{MemorySubjectStore, PostgresSubjectStore, SubjectVerifierState};
pub use session::{MemorySessionStore, PostgresSessionStore, SessionStoreState};

/// ApiDoc
///
/// Auto-generated OpenAPI document for every page and session endpoint,
/// served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::home, handlers::about, handlers::map, handlers::statistic,
        handlers::report, handlers::login_page, handlers::login, handlers::logout,
        handlers::user_dashboard, handlers::admin_dashboard
    ),
    components(
        schemas(
            models::Credentials, models::Page, models::LoginPageProps,
            models::DashboardProps, models::Role,
        )
    ),
    tags(
        (name = "role-portal", description = "Session login and role-gated pages")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, thread-safe container of shared services. Only the two stores are
/// shared across concurrent requests; everything per-request lives in the session.
#[derive(Clone)]
pub struct AppState {
    /// Credential verification against the subject store.
    pub subjects: SubjectVerifierState,
    /// Durable session storage.
    pub sessions: SessionStoreState,
    /// Logical route name resolution.
    pub routes: RouteTable,
    pub config: AppConfig,
}

impl AppState {
    /// Assembles a state whose route table follows the configuration.
    pub fn new(
        subjects: SubjectVerifierState,
        sessions: SessionStoreState,
        config: AppConfig,
    ) -> Self {
        Self {
            subjects,
            sessions,
            routes: RouteTable::new(config.password_reset_enabled),
            config,
        }
    }
}

/// create_router
///
/// Assembles the routing structure, applies the gate chains to the role routers,
/// wraps everything in the session layer and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: no gates.
        .merge(public::public_routes())
        // User Routes: authenticated → verified → role:user.
        .merge(user::user_routes().route_layer(middleware::from_fn_with_state(
            GateChain::for_role(Role::User),
            gate::enforce,
        )))
        // Admin Routes: authenticated → verified → role:admin, nested under '/admin'.
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                GateChain::for_role(Role::Admin),
                gate::enforce,
            )),
        )
        // CSRF: unsafe methods must echo the session token.
        .layer(middleware::from_fn(session::verify_csrf))
        // Session Layer: outermost of the application layers, so every gate and
        // handler sees the loaded session.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::session_layer,
        ))
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request tracing span, tagging it with the `x-request-id` set
/// by `SetRequestIdLayer` so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
