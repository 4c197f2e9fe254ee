//! Identity provider boundary.
//!
//! The provider pushes identity changes (a principal, or `None` after sign-out
//! or expiry) and can be told to sign the current principal out.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use concierge_auth::Principal;

/// One identity change: `Some` when signed in, `None` when signed out.
pub type IdentityEvent = Option<Principal>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Push-based stream of identity changes.
#[derive(Debug)]
pub struct IdentityStream {
    receiver: mpsc::UnboundedReceiver<IdentityEvent>,
}

impl IdentityStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<IdentityEvent>) -> Self {
        Self { receiver }
    }

    /// Next identity change; `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<IdentityEvent> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to identity changes. Implementations deliver the current
    /// identity as the first event.
    fn subscribe(&self) -> IdentityStream;

    /// Terminate the provider-side session of the current principal.
    async fn sign_out(&self) -> Result<(), ProviderError>;
}
