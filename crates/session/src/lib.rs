//! `concierge-session` — session resolution and access gates.
//!
//! Identity events flow into [`SessionController`], which resolves them
//! against the allowlist and profile directory and publishes the result on a
//! [`SessionStore`]. Consumers only ever see a [`SessionReader`].

pub mod controller;
pub mod gates;
pub mod identity;
pub mod state;

pub use controller::SessionController;
pub use gates::{GateDecision, GateRoutes, RequireRole, RequireSession, RequiredRole};
pub use identity::{IdentityEvent, IdentityProvider, IdentityStream, ProviderError};
pub use state::{Attempt, SessionClosed, SessionPhase, SessionReader, SessionSnapshot, SessionStore};
