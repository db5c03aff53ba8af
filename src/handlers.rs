use crate::{
    auth::Authenticator,
    gate::Rejection,
    models::{Credentials, DashboardProps, LoginPageProps, Page},
    session::{AuthState, SessionContext},
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;

// --- Public Pages ---

/// home
///
/// [Public Route] The landing page.
#[utoipa::path(get, path = "/", responses((status = 200, description = "Landing page", body = Page)))]
pub async fn home() -> Json<Page> {
    Json(Page::new("Dashboard", "/", json!({})))
}

#[utoipa::path(get, path = "/about", responses((status = 200, description = "About page", body = Page)))]
pub async fn about() -> Json<Page> {
    Json(Page::new("user/About", "/about", json!({})))
}

#[utoipa::path(get, path = "/map", responses((status = 200, description = "Map page", body = Page)))]
pub async fn map() -> Json<Page> {
    Json(Page::new("user/Map", "/map", json!({})))
}

#[utoipa::path(get, path = "/statistic", responses((status = 200, description = "Statistics page", body = Page)))]
pub async fn statistic() -> Json<Page> {
    Json(Page::new("user/Statistic", "/statistic", json!({})))
}

#[utoipa::path(get, path = "/report", responses((status = 200, description = "Report page", body = Page)))]
pub async fn report() -> Json<Page> {
    Json(Page::new("user/Report", "/report", json!({})))
}

// --- Session Lifecycle ---

fn login_page_payload(props: LoginPageProps) -> Page {
    Page::new("auth/Login", "/login", props)
}

/// login_page
///
/// [Public Route] Renders the login form with the optional one-shot status message
/// and whether password reset is offered.
#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Login form", body = Page))
)]
pub async fn login_page(
    State(auth): State<Authenticator>,
    session: SessionContext,
) -> Json<Page> {
    let mut session = session.lock().await;
    Json(login_page_payload(auth.login_page(&mut session)))
}

/// login
///
/// [Public Route] Authenticates the submitted credentials.
///
/// *Success*: 303 to the intended destination or the role's dashboard.
/// *Failure*: the login form again, with the message under the `email` field.
/// An unrecognized role has already ended the session by the time it is rendered.
#[utoipa::path(
    post,
    path = "/login",
    request_body = Credentials,
    responses(
        (status = 303, description = "Authenticated; redirect to destination"),
        (status = 200, description = "Login form with field errors", body = Page),
        (status = 403, description = "Missing or mismatched X-CSRF-TOKEN header"),
        (status = 500, description = "Session or subject store failure")
    )
)]
pub async fn login(
    State(auth): State<Authenticator>,
    session: SessionContext,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut session = session.lock().await;

    match auth.authenticate(&mut session, &credentials).await {
        Ok(outcome) => Redirect::to(&outcome.destination).into_response(),
        Err(err) => match err.field_errors() {
            Some(errors) => {
                let props = LoginPageProps {
                    errors,
                    ..auth.login_page(&mut session)
                };
                Json(login_page_payload(props)).into_response()
            }
            None => {
                tracing::error!("login failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}

/// logout
///
/// [Public Route] Ends the current session, whatever its state, and redirects to `/`.
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 303, description = "Logged out; redirect to root"),
        (status = 403, description = "Missing or mismatched X-CSRF-TOKEN header")
    )
)]
pub async fn logout(State(auth): State<Authenticator>, session: SessionContext) -> Redirect {
    let mut session = session.lock().await;
    let destination = auth.logout(&mut session).await;
    Redirect::to(&destination)
}

// --- Role Pages ---

/// Identity for a dashboard. The gate chain guarantees authentication; an
/// anonymous session here means the page was mounted without its gates.
async fn dashboard_props(session: &SessionContext) -> Result<DashboardProps, Rejection> {
    match session.lock().await.auth() {
        AuthState::Authenticated {
            subject_id, role, ..
        } => Ok(DashboardProps { subject_id, role }),
        AuthState::Anonymous => Err(Rejection::Unauthenticated),
    }
}

/// user_dashboard
///
/// [User Route] Guarded by authenticated → verified → role:user.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "User dashboard", body = Page),
        (status = 403, description = "Unauthorized")
    )
)]
pub async fn user_dashboard(session: SessionContext) -> Result<Json<Page>, Rejection> {
    let props = dashboard_props(&session).await?;
    Ok(Json(Page::new("Dashboard", "/dashboard", props)))
}

/// admin_dashboard
///
/// [Admin Route] Guarded by authenticated → verified → role:admin.
#[utoipa::path(
    get,
    path = "/admin/dashboard",
    responses(
        (status = 200, description = "Admin dashboard", body = Page),
        (status = 403, description = "Unauthorized")
    )
)]
pub async fn admin_dashboard(session: SessionContext) -> Result<Json<Page>, Rejection> {
    let props = dashboard_props(&session).await?;
    Ok(Json(Page::new("admin/Dashboard", "/admin/dashboard", props)))
}
