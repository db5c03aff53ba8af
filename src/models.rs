use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{error::UnknownRole, routes::names};

// --- Identity ---

/// Role
///
/// The closed set of roles the portal dispatches on. Comparison is exact:
/// there is no hierarchy, and an admin does not implicitly pass a `user` gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Logical route name of the role's default post-login destination.
    pub fn dashboard_route(&self) -> &'static str {
        match self {
            Role::Admin => names::ADMIN_DASHBOARD,
            Role::User => names::USER_DASHBOARD,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Exact, case-sensitive match against the stored role tag.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Subject
///
/// A verified account as returned by the subject store. `role` is kept as the raw
/// stored string; it only becomes a `Role` once the authenticator accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub email_verified_at: Option<DateTime<Utc>>,
}

impl Subject {
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Credentials
///
/// The login form payload (POST /login). Never persisted and never logged; the
/// `Debug` impl redacts the password.
#[derive(Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// --- Page Payloads (rendered client-side) ---

/// Page
///
/// The payload handed to the client-side router: which component to mount and
/// the props to mount it with.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Page {
    pub component: String,
    #[schema(value_type = Object)]
    #[ts(type = "Record<string, unknown>")]
    pub props: serde_json::Value,
    pub url: String,
}

impl Page {
    pub fn new(component: &str, url: &str, props: impl Serialize) -> Self {
        Self {
            component: component.to_string(),
            props: serde_json::to_value(props).unwrap_or_else(|e| {
                tracing::error!(component, "page props could not be serialized: {}", e);
                serde_json::Value::Null
            }),
            url: url.to_string(),
        }
    }
}

/// LoginPageProps
///
/// Props for `auth/Login`. `errors` is keyed by form field and is empty unless
/// the previous attempt failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginPageProps {
    pub can_reset_password: bool,
    pub status: Option<String>,
    /// Echoed back in the `X-CSRF-TOKEN` header of every POST.
    pub csrf_token: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// DashboardProps
///
/// Identity shown on the role dashboards. The role here is the one copied onto the
/// session at login time.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DashboardProps {
    pub subject_id: Uuid,
    pub role: Role,
}
