//! Route guards over the session read projection.

use serde::{Deserialize, Serialize};

use concierge_auth::normalize;

use crate::state::SessionSnapshot;

/// Paths the gates redirect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateRoutes {
    pub sign_in: String,
    pub tenant_selection: String,
    pub role_fallback: String,
}

impl Default for GateRoutes {
    fn default() -> Self {
        Self {
            sign_in: "/login".to_string(),
            tenant_selection: "/select-company".to_string(),
            role_fallback: "/".to_string(),
        }
    }
}

/// What the routing layer should do with a guarded view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Session not settled yet; render nothing.
    Wait,
    Redirect {
        to: String,
        /// Origin to return to after signing in.
        return_to: Option<String>,
    },
    Render,
}

impl GateDecision {
    fn redirect(to: &str) -> Self {
        GateDecision::Redirect {
            to: to.to_string(),
            return_to: None,
        }
    }
}

/// Path without query/fragment and trailing slash.
fn route_of(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Requires a signed-in principal with a resolved tenant.
#[derive(Debug, Clone)]
pub struct RequireSession<'a> {
    routes: &'a GateRoutes,
}

impl<'a> RequireSession<'a> {
    pub fn new(routes: &'a GateRoutes) -> Self {
        Self { routes }
    }

    pub fn evaluate(&self, session: &SessionSnapshot, current_path: &str) -> GateDecision {
        if !session.ready {
            return GateDecision::Wait;
        }
        if session.principal.is_none() {
            return GateDecision::Redirect {
                to: self.routes.sign_in.clone(),
                return_to: Some(current_path.to_string()),
            };
        }
        if session.tenant_id.is_none()
            && route_of(current_path) != route_of(&self.routes.tenant_selection)
        {
            return GateDecision::redirect(&self.routes.tenant_selection);
        }
        GateDecision::Render
    }
}

/// Role a guarded view demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredRole {
    /// Any admin-class role.
    Admin,
    /// The member role or any admin-class role.
    Member,
}

/// Requires the session role to satisfy [`RequiredRole`].
///
/// Runs downstream of [`RequireSession`] and does not wait on readiness.
#[derive(Debug, Clone)]
pub struct RequireRole {
    required: RequiredRole,
    fallback: String,
}

impl RequireRole {
    pub fn new(required: RequiredRole, fallback: impl Into<String>) -> Self {
        Self {
            required,
            fallback: fallback.into(),
        }
    }

    pub fn with_routes(required: RequiredRole, routes: &GateRoutes) -> Self {
        Self::new(required, routes.role_fallback.clone())
    }

    pub fn evaluate(&self, session: &SessionSnapshot) -> GateDecision {
        let role = normalize(session.role.as_ref().map(|r| r.as_str()));
        let allowed = match self.required {
            RequiredRole::Admin => role.is_admin(),
            RequiredRole::Member => role.is_member_or_admin(),
        };
        if allowed {
            GateDecision::Render
        } else {
            GateDecision::redirect(&self.fallback)
        }
    }
}
