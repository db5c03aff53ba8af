//! Router Module Index
//!
//! Organizes routing into access-segregated modules. Role gating is applied at the
//! module level (via Axum route layers in `create_router`), so a page cannot be
//! mounted without the gate chain of the module it lives in.

use std::collections::HashMap;

/// Routes accessible to anonymous and logged-in callers alike, including the
/// login and logout endpoints.
pub mod public;

/// Routes restricted to sessions authenticated with the `user` role.
pub mod user;

/// Routes restricted to sessions authenticated with the `admin` role.
/// Mounted under `/admin`.
pub mod admin;

/// Logical route names. The authenticator only ever asks for destinations by name.
pub mod names {
    pub const HOME: &str = "home";
    pub const LOGIN: &str = "login";
    pub const USER_DASHBOARD: &str = "user.dashboard";
    pub const ADMIN_DASHBOARD: &str = "admin.dashboard";
    pub const PASSWORD_REQUEST: &str = "password.request";
}

/// RouteTable
///
/// Resolves logical route names to concrete paths.
#[derive(Debug, Clone)]
pub struct RouteTable {
    paths: HashMap<&'static str, String>,
}

impl RouteTable {
    /// The portal's routes. `password.request` is only registered when password
    /// reset is offered.
    pub fn new(password_reset_enabled: bool) -> Self {
        let mut paths = HashMap::from([
            (names::HOME, "/".to_string()),
            (names::LOGIN, "/login".to_string()),
            (names::USER_DASHBOARD, "/dashboard".to_string()),
            (names::ADMIN_DASHBOARD, "/admin/dashboard".to_string()),
        ]);
        if password_reset_enabled {
            paths.insert(names::PASSWORD_REQUEST, "/forgot-password".to_string());
        }
        Self { paths }
    }

    pub fn has(&self, name: &str) -> bool {
        self.paths.contains_key(name)
    }

    /// Unknown names resolve to the public root.
    pub fn resolve(&self, name: &str) -> &str {
        match self.paths.get(name) {
            Some(path) => path,
            None => {
                tracing::warn!(route = name, "unknown route name, falling back to root");
                "/"
            }
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(false)
    }
}
