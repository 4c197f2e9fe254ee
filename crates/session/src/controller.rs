//! Session controller: runs one resolution attempt per identity event.
//!
//! ```text
//! Idle ──principal──▶ Resolving ──not allowlisted──▶ Denied (provider signed out)
//!                        │──authorized, no tenant──▶ AuthorizedNoTenant
//!                        └──authorized + tenant────▶ AuthorizedWithTenant
//! any ──no principal──▶ Idle
//! ```
//!
//! Each attempt is: allowlist lookup, then profile reconciliation, then one
//! final publish. The latest event wins; superseded attempts are dropped at
//! publish time.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use concierge_auth::allowlist::ResolverStrategy;
use concierge_auth::store::decode;
use concierge_auth::{
    records::fields, AllowlistResolver, AuthError, Collections, DirectoryStore, Document,
    Principal, ProfileReconciler, Resolution, TenantRecord, UserProfile,
};
use concierge_core::TenantId;

use crate::identity::{IdentityEvent, IdentityProvider};
use crate::state::{Attempt, SessionPhase, SessionReader, SessionSnapshot, SessionStore};

/// Terminal result of one attempt, before it is published.
enum Outcome {
    Denied(AuthError),
    Authorized {
        profile: UserProfile,
        write_error: Option<AuthError>,
    },
}

struct Inner {
    store: SessionStore,
    provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn DirectoryStore>,
    collections: Collections,
    resolver: AllowlistResolver,
    reconciler: ProfileReconciler,
}

/// Owns the session state and keeps it in sync with the identity provider.
pub struct SessionController {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn DirectoryStore>,
        collections: Collections,
    ) -> Self {
        let resolver = AllowlistResolver::new(directory.clone(), collections.clone());
        Self::with_resolver(provider, directory, collections, resolver)
    }

    /// Use a custom allowlist strategy chain.
    pub fn with_strategies(
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn DirectoryStore>,
        collections: Collections,
        strategies: Vec<Box<dyn ResolverStrategy>>,
    ) -> Self {
        let resolver =
            AllowlistResolver::with_strategies(directory.clone(), collections.clone(), strategies);
        Self::with_resolver(provider, directory, collections, resolver)
    }

    fn with_resolver(
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn DirectoryStore>,
        collections: Collections,
        resolver: AllowlistResolver,
    ) -> Self {
        let reconciler = ProfileReconciler::new(directory.clone(), collections.clone());
        Self {
            inner: Arc::new(Inner {
                store: SessionStore::new(),
                provider,
                directory,
                collections,
                resolver,
                reconciler,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Read-only view handed to gates and other consumers.
    pub fn reader(&self) -> SessionReader {
        self.inner.store.reader()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.snapshot()
    }

    /// Subscribe to the identity provider. Must run inside a tokio runtime.
    ///
    /// Calling `init` again replaces the previous subscription.
    pub fn init(&self) {
        self.inner.store.init();
        let mut stream = self.inner.provider.subscribe();
        let inner = self.inner.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if let Some((attempt, principal)) = inner.begin(event) {
                    tokio::spawn(inner.clone().resolve(attempt, principal));
                }
            }
            debug!("identity stream closed");
        });

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Drop the subscription. In-flight attempts finish but publish nothing.
    pub fn teardown(&self) {
        self.inner.store.teardown();
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }

    /// Process one identity event to completion.
    ///
    /// This is what the subscription does for every event, minus the spawn;
    /// the store must have been initialized.
    pub async fn handle(&self, event: IdentityEvent) {
        if let Some((attempt, principal)) = self.inner.begin(event) {
            self.inner.clone().resolve(attempt, principal).await;
        }
    }

    /// Manually point the signed-in principal at a tenant.
    ///
    /// On failure the session is left untouched.
    pub async fn assign_tenant(&self, tenant_id: TenantId) -> Result<(), AuthError> {
        self.inner.assign_tenant(tenant_id).await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Inner {
    /// Start an attempt for `event`. Sign-outs settle immediately and need no
    /// further work, so only sign-ins come back with an attempt to resolve.
    fn begin(&self, event: IdentityEvent) -> Option<(Attempt, Principal)> {
        match event {
            None => {
                let attempt = self.store.begin(|s| {
                    s.clear_identity();
                    s.phase = SessionPhase::Idle;
                    s.ready = true;
                });
                if let Some(attempt) = attempt {
                    info!(attempt = %attempt, "signed out; session cleared");
                }
                None
            }
            Some(principal) => {
                let attempt = self.store.begin(|s| {
                    s.clear_identity();
                    s.principal = Some(principal.clone());
                    s.error = None;
                    s.phase = SessionPhase::Resolving;
                    s.ready = false;
                })?;
                info!(
                    attempt = %attempt,
                    principal_id = %principal.id,
                    email = %principal.email,
                    "resolving session"
                );
                Some((attempt, principal))
            }
        }
    }

    async fn resolve(self: Arc<Self>, attempt: Attempt, principal: Principal) {
        let outcome = self.run(&principal).await;

        if !self.store.is_current(attempt) {
            debug!(attempt = %attempt, principal_id = %principal.id, "stale attempt discarded");
            return;
        }

        match outcome {
            Ok(Outcome::Denied(err)) => self.settle_denied(attempt, &principal, err).await,
            Ok(Outcome::Authorized {
                profile,
                write_error,
            }) => self.settle_authorized(attempt, &principal, profile, write_error),
            Err(err) => self.settle_failed(attempt, &principal, err),
        }
    }

    async fn run(&self, principal: &Principal) -> Result<Outcome, AuthError> {
        let resolution = self.resolver.resolve(&principal.email, &principal.id).await?;

        let record = match resolution {
            Resolution::Authorized { record, .. } => record,
            Resolution::NotAuthorized => {
                return Ok(Outcome::Denied(AuthError::DeniedAccess {
                    email: principal.email.clone(),
                }));
            }
        };

        let reconciliation = self.reconciler.reconcile(principal, &record).await?;
        Ok(Outcome::Authorized {
            profile: reconciliation.profile,
            write_error: reconciliation.write_error,
        })
    }

    async fn settle_denied(&self, attempt: Attempt, principal: &Principal, err: AuthError) {
        let message = err.user_message();
        let published = self.store.publish(attempt, |s| {
            s.clear_identity();
            s.error = message;
            s.phase = SessionPhase::Denied;
            s.ready = true;
        });
        if !published {
            return;
        }

        info!(attempt = %attempt, email = %principal.email, "access denied");
        if let Err(e) = self.provider.sign_out().await {
            warn!(attempt = %attempt, error = %e, "forced sign-out failed");
        }
    }

    fn settle_authorized(
        &self,
        attempt: Attempt,
        principal: &Principal,
        profile: UserProfile,
        write_error: Option<AuthError>,
    ) {
        if let Some(err) = write_error {
            // Session proceeds on the computed profile; the write is retried
            // implicitly on the next sign-in.
            warn!(
                attempt = %attempt,
                principal_id = %principal.id,
                error = %err,
                "profile backfill not persisted"
            );
        }

        let phase = match profile.tenant_id {
            Some(_) => SessionPhase::AuthorizedWithTenant,
            None => SessionPhase::AuthorizedNoTenant,
        };
        let tenant_id = profile.tenant_id.clone();

        let published = self.store.publish(attempt, |s| {
            s.principal = Some(principal.clone());
            s.tenant_id = profile.tenant_id;
            s.tenant_name = profile.tenant_name;
            s.role = profile.role;
            s.permissions = profile.permissions.unwrap_or_default();
            s.error = None;
            s.phase = phase;
            s.ready = true;
        });

        if published {
            info!(
                attempt = %attempt,
                principal_id = %principal.id,
                tenant_id = tenant_id.as_ref().map(TenantId::as_str).unwrap_or("-"),
                phase = ?phase,
                "session resolved"
            );
        }
    }

    fn settle_failed(&self, attempt: Attempt, principal: &Principal, err: AuthError) {
        error!(
            attempt = %attempt,
            principal_id = %principal.id,
            error = %err,
            "session resolution failed"
        );
        let message = err.user_message();
        self.store.publish(attempt, |s| {
            s.tenant_id = None;
            s.tenant_name = None;
            s.role = None;
            s.permissions.clear();
            s.error = message;
            s.phase = SessionPhase::Resolving;
            s.ready = true;
        });
    }

    async fn assign_tenant(&self, tenant_id: TenantId) -> Result<(), AuthError> {
        let snapshot = self.store.snapshot();
        let principal = match (&snapshot.principal, snapshot.phase) {
            (
                Some(principal),
                SessionPhase::AuthorizedNoTenant | SessionPhase::AuthorizedWithTenant,
            ) => principal.clone(),
            _ => {
                return Err(AuthError::tenant_assignment(
                    "no authorized principal to assign a tenant to",
                ));
            }
        };

        let tenant: TenantRecord = self
            .directory
            .get(&self.collections.tenants, tenant_id.as_str())
            .await
            .and_then(|doc| doc.map(decode).transpose())
            .map_err(|e| AuthError::tenant_assignment(e.to_string()))?
            .ok_or_else(|| AuthError::tenant_assignment(format!("unknown tenant '{tenant_id}'")))?;

        let mut patch = Document::new();
        patch.insert(fields::TENANT_ID.to_string(), tenant_id.as_str().into());
        if let Some(name) = &tenant.name {
            patch.insert(fields::TENANT_NAME.to_string(), name.as_str().into());
        }

        self.directory
            .merge(&self.collections.profiles, principal.id.as_str(), patch)
            .await
            .map_err(|e| {
                warn!(
                    principal_id = %principal.id,
                    tenant_id = %tenant_id,
                    error = %e,
                    "tenant assignment write failed"
                );
                AuthError::tenant_assignment(e.to_string())
            })?;

        // Only a settled, authorized session for the same principal takes the
        // tenant; a re-resolution in flight will pick it up from the profile.
        let applied = self.store.update(|s| {
            let authorized = matches!(
                s.phase,
                SessionPhase::AuthorizedNoTenant | SessionPhase::AuthorizedWithTenant
            );
            let same_principal = s.principal.as_ref().map(|p| &p.id) == Some(&principal.id);
            if !(s.ready && authorized && same_principal) {
                return false;
            }
            s.tenant_id = Some(tenant_id.clone());
            s.tenant_name = tenant.name.clone();
            s.phase = SessionPhase::AuthorizedWithTenant;
            true
        });
        if !applied {
            return Err(AuthError::tenant_assignment(
                "session changed while assigning tenant",
            ));
        }

        info!(principal_id = %principal.id, tenant_id = %tenant_id, "tenant assigned");
        Ok(())
    }
}
