//! `concierge-auth` — authorization resolution (who gets in, under which tenant and role).
//!
//! This crate is decoupled from any runtime and from the concrete document
//! store: storage is reached only through [`DirectoryStore`].

pub mod allowlist;
pub mod error;
pub mod permissions;
pub mod principal;
pub mod reconcile;
pub mod records;
pub mod roles;
pub mod store;

pub use allowlist::{AllowlistResolver, Resolution, ResolverStrategy};
pub use error::{AuthError, READ_FAILURE_MESSAGE};
pub use permissions::Permission;
pub use principal::Principal;
pub use reconcile::{FieldChange, ProfilePatch, ProfileReconciler, Reconciliation};
pub use records::{AuthorizationRecord, TenantRecord, UserProfile};
pub use roles::{is_admin, normalize, NormalizedRole, Role};
pub use store::{Collections, DirectoryStore, Document, StoreError};
