use serde::{Deserialize, Serialize};

use concierge_core::{DomainResult, Email, PrincipalId};

/// Authenticated identity handed over by the identity provider.
///
/// Immutable for the lifetime of a sign-in; a new sign-in yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: Email,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Principal {
    pub fn new(id: PrincipalId, email: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            email: Email::parse(email)?,
            display_name: None,
            avatar_url: None,
        })
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}
