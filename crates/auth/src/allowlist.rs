//! Allowlist resolution.
//!
//! Resolution walks an ordered chain of strategies; the first one that
//! returns a record wins. The default chain is:
//!
//! 1. keyed lookup by normalized email (current convention)
//! 2. equality scan on the `email` field (records predating keyed lookup)
//! 3. the principal's own profile, when its stored email matches (profiles
//!    predating allowlist gating)
//!
//! Store failures stop the chain and propagate. Nothing is retried here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use concierge_core::{Email, PrincipalId};

use crate::error::AuthError;
use crate::records::{AuthorizationRecord, UserProfile};
use crate::store::{decode, Collections, DirectoryStore, StoreError};

/// Outcome of allowlist resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authorized {
        record: AuthorizationRecord,
        /// Name of the strategy that produced the record.
        strategy: &'static str,
    },
    NotAuthorized,
}

impl Resolution {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Resolution::Authorized { .. })
    }

    pub fn record(&self) -> Option<&AuthorizationRecord> {
        match self {
            Resolution::Authorized { record, .. } => Some(record),
            Resolution::NotAuthorized => None,
        }
    }
}

/// Lookup input shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub email: &'a Email,
    pub principal_id: &'a PrincipalId,
    pub collections: &'a Collections,
}

/// One way of finding an authorization record.
#[async_trait]
pub trait ResolverStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(
        &self,
        store: &dyn DirectoryStore,
        lookup: Lookup<'_>,
    ) -> Result<Option<AuthorizationRecord>, StoreError>;
}

/// Direct get with the normalized email as document key.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyedLookup;

#[async_trait]
impl ResolverStrategy for KeyedLookup {
    fn name(&self) -> &'static str {
        "keyed"
    }

    async fn lookup(
        &self,
        store: &dyn DirectoryStore,
        lookup: Lookup<'_>,
    ) -> Result<Option<AuthorizationRecord>, StoreError> {
        store
            .get(&lookup.collections.allowlist, lookup.email.as_str())
            .await?
            .map(decode)
            .transpose()
    }
}

/// Equality query on the allowlist `email` field; first match is used.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailScan;

#[async_trait]
impl ResolverStrategy for EmailScan {
    fn name(&self) -> &'static str {
        "email_scan"
    }

    async fn lookup(
        &self,
        store: &dyn DirectoryStore,
        lookup: Lookup<'_>,
    ) -> Result<Option<AuthorizationRecord>, StoreError> {
        let matches = store
            .find_equal(&lookup.collections.allowlist, "email", lookup.email.as_str())
            .await?;
        matches.into_iter().next().map(decode).transpose()
    }
}

/// Falls back to the principal's existing profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProfileDerived;

#[async_trait]
impl ResolverStrategy for ProfileDerived {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn lookup(
        &self,
        store: &dyn DirectoryStore,
        lookup: Lookup<'_>,
    ) -> Result<Option<AuthorizationRecord>, StoreError> {
        let Some(doc) = store
            .get(&lookup.collections.profiles, lookup.principal_id.as_str())
            .await?
        else {
            return Ok(None);
        };

        let profile: UserProfile = decode(doc)?;
        let email_matches = profile
            .email
            .as_deref()
            .is_some_and(|stored| lookup.email.matches(stored));
        if !email_matches {
            return Ok(None);
        }

        Ok(Some(AuthorizationRecord {
            email: profile.email,
            tenant_id: profile.tenant_id,
            role: profile.role,
            permissions: profile.permissions,
            tenant_name: profile.tenant_name,
        }))
    }
}

/// The strategy chain in its canonical order.
pub fn default_strategies() -> Vec<Box<dyn ResolverStrategy>> {
    vec![
        Box::new(KeyedLookup),
        Box::new(EmailScan),
        Box::new(ProfileDerived),
    ]
}

/// Resolves whether an email is admitted, and under which tenant/role.
pub struct AllowlistResolver {
    store: Arc<dyn DirectoryStore>,
    collections: Collections,
    strategies: Vec<Box<dyn ResolverStrategy>>,
}

impl AllowlistResolver {
    pub fn new(store: Arc<dyn DirectoryStore>, collections: Collections) -> Self {
        Self::with_strategies(store, collections, default_strategies())
    }

    pub fn with_strategies(
        store: Arc<dyn DirectoryStore>,
        collections: Collections,
        strategies: Vec<Box<dyn ResolverStrategy>>,
    ) -> Self {
        Self {
            store,
            collections,
            strategies,
        }
    }

    pub async fn resolve(
        &self,
        email: &Email,
        principal_id: &PrincipalId,
    ) -> Result<Resolution, AuthError> {
        let lookup = Lookup {
            email,
            principal_id,
            collections: &self.collections,
        };

        for strategy in &self.strategies {
            let found = strategy
                .lookup(&*self.store, lookup)
                .await
                .map_err(AuthError::DirectoryRead)?;

            match found {
                Some(record) => {
                    info!(
                        email = %email,
                        principal_id = %principal_id,
                        strategy = strategy.name(),
                        "allowlist record resolved"
                    );
                    return Ok(Resolution::Authorized {
                        record,
                        strategy: strategy.name(),
                    });
                }
                None => debug!(email = %email, strategy = strategy.name(), "no allowlist match"),
            }
        }

        Ok(Resolution::NotAuthorized)
    }
}
