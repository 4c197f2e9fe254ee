//! Failure taxonomy of the authorization engine.

use thiserror::Error;

use concierge_core::Email;

use crate::store::StoreError;

/// Message shown when the directory could not be read.
pub const READ_FAILURE_MESSAGE: &str = "Failed to load authentication state.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Principal is not on the allowlist under any lookup strategy.
    #[error("access denied for {email}")]
    DeniedAccess { email: Email },

    /// Allowlist/profile lookup failed; surfaced, never retried here.
    #[error("directory read failed: {0}")]
    DirectoryRead(#[source] StoreError),

    /// Profile write failed; absorbed by the session controller.
    #[error("directory write failed: {0}")]
    DirectoryWrite(#[source] StoreError),

    /// Manual tenant selection failed; reported to the caller only.
    #[error("tenant assignment failed: {0}")]
    TenantAssignment(String),
}

impl AuthError {
    pub fn tenant_assignment(msg: impl Into<String>) -> Self {
        Self::TenantAssignment(msg.into())
    }

    /// Message to publish on the session, if this failure is user-visible.
    pub fn user_message(&self) -> Option<String> {
        match self {
            AuthError::DeniedAccess { email } => Some(format!(
                "Access denied for {email}. Your account is not on the allowlist."
            )),
            AuthError::DirectoryRead(_) => Some(READ_FAILURE_MESSAGE.to_string()),
            AuthError::DirectoryWrite(_) => None,
            AuthError::TenantAssignment(msg) => Some(msg.clone()),
        }
    }
}
