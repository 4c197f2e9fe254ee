//! Profile reconciliation.
//!
//! The allowlist record is authoritative. For tenant id, role, permissions and
//! tenant name the reconciler writes a field when the profile lacks it
//! (backfill) or holds a different value (override). Display attributes are
//! refreshed from the live principal. Everything goes out as one merge write;
//! an empty plan means no write at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use concierge_core::TenantId;

use crate::error::AuthError;
use crate::principal::Principal;
use crate::records::{fields, AuthorizationRecord, UserProfile};
use crate::store::{decode, Collections, DirectoryStore, Document};
use crate::{Permission, Role};

/// Why a field is part of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    /// Profile did not exist; field written as part of creation.
    Created,
    /// Profile lacked the field, the allowlist supplies it.
    Backfilled,
    /// Profile held a different value; allowlist wins.
    Overridden,
    /// Display attribute refreshed from the live principal.
    Refreshed,
}

/// Planned merge write against a profile document, plus the profile it yields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePatch {
    fields: Document,
    changes: Vec<(&'static str, FieldChange)>,
    creates: bool,
    profile: UserProfile,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when the patch creates the profile document.
    pub fn creates(&self) -> bool {
        self.creates
    }

    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn changes(&self) -> &[(&'static str, FieldChange)] {
        &self.changes
    }

    pub fn change_for(&self, field: &str) -> Option<FieldChange> {
        self.changes
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, change)| *change)
    }

    /// Profile as it reads after the patch is applied.
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    fn set(&mut self, field: &'static str, value: Value, change: FieldChange) {
        self.fields.insert(field.to_string(), value);
        self.changes.push((field, change));
    }
}

trait FieldValue {
    fn to_field(&self) -> Value;
}

impl FieldValue for String {
    fn to_field(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FieldValue for TenantId {
    fn to_field(&self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl FieldValue for Role {
    fn to_field(&self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl FieldValue for Vec<Permission> {
    fn to_field(&self) -> Value {
        Value::Array(
            self.iter()
                .map(|p| Value::String(p.as_str().to_string()))
                .collect(),
        )
    }
}

/// Authoritative field: backfill when missing, override when different.
fn authoritative<T>(
    patch: &mut ProfilePatch,
    field: &'static str,
    slot: fn(&mut UserProfile) -> &mut Option<T>,
    incoming: Option<&T>,
) where
    T: FieldValue + Clone + PartialEq,
{
    let Some(incoming) = incoming else {
        return;
    };
    let change = match slot(&mut patch.profile) {
        None => FieldChange::Backfilled,
        Some(stored) if stored != incoming => FieldChange::Overridden,
        Some(_) => return,
    };
    *slot(&mut patch.profile) = Some(incoming.clone());
    patch.set(field, incoming.to_field(), change);
}

/// Display attribute: refreshed from the principal when it differs.
fn refreshed(
    patch: &mut ProfilePatch,
    field: &'static str,
    slot: fn(&mut UserProfile) -> &mut Option<String>,
    live: Option<&String>,
) {
    let Some(live) = live else {
        return;
    };
    if slot(&mut patch.profile).as_ref() == Some(live) {
        return;
    }
    *slot(&mut patch.profile) = Some(live.clone());
    patch.set(field, live.to_field(), FieldChange::Refreshed);
}

/// Compute the merge write needed to bring `existing` in line with `record`.
pub fn plan(
    principal: &Principal,
    existing: Option<&UserProfile>,
    record: &AuthorizationRecord,
    now: DateTime<Utc>,
) -> ProfilePatch {
    let Some(existing) = existing else {
        return plan_create(principal, record, now);
    };

    let mut patch = ProfilePatch {
        fields: Document::new(),
        changes: Vec::new(),
        creates: false,
        profile: existing.clone(),
    };

    if patch.profile.email.is_none() {
        let email = principal.email.to_string();
        patch.profile.email = Some(email.clone());
        patch.set(fields::EMAIL, email.to_field(), FieldChange::Backfilled);
    }

    refreshed(
        &mut patch,
        fields::DISPLAY_NAME,
        |p| &mut p.display_name,
        principal.display_name.as_ref(),
    );
    refreshed(
        &mut patch,
        fields::AVATAR_URL,
        |p| &mut p.avatar_url,
        principal.avatar_url.as_ref(),
    );

    authoritative(
        &mut patch,
        fields::TENANT_ID,
        |p| &mut p.tenant_id,
        record.tenant_id.as_ref(),
    );
    authoritative(&mut patch, fields::ROLE, |p| &mut p.role, record.role.as_ref());
    authoritative(
        &mut patch,
        fields::PERMISSIONS,
        |p| &mut p.permissions,
        record.permissions.as_ref(),
    );
    authoritative(
        &mut patch,
        fields::TENANT_NAME,
        |p| &mut p.tenant_name,
        record.tenant_name.as_ref(),
    );

    patch
}

fn plan_create(
    principal: &Principal,
    record: &AuthorizationRecord,
    now: DateTime<Utc>,
) -> ProfilePatch {
    let profile = UserProfile {
        email: Some(principal.email.to_string()),
        display_name: principal.display_name.clone(),
        avatar_url: principal.avatar_url.clone(),
        tenant_id: record.tenant_id.clone(),
        role: record.role.clone(),
        permissions: record.permissions.clone(),
        tenant_name: record.tenant_name.clone(),
        created_at: Some(now),
    };

    let mut patch = ProfilePatch {
        fields: Document::new(),
        changes: Vec::new(),
        creates: true,
        profile: profile.clone(),
    };

    let created = FieldChange::Created;
    if let Some(email) = &profile.email {
        patch.set(fields::EMAIL, email.to_field(), created);
    }
    if let Some(name) = &profile.display_name {
        patch.set(fields::DISPLAY_NAME, name.to_field(), created);
    }
    if let Some(url) = &profile.avatar_url {
        patch.set(fields::AVATAR_URL, url.to_field(), created);
    }
    if let Some(tenant_id) = &profile.tenant_id {
        patch.set(fields::TENANT_ID, tenant_id.to_field(), created);
    }
    if let Some(role) = &profile.role {
        patch.set(fields::ROLE, role.to_field(), created);
    }
    if let Some(permissions) = &profile.permissions {
        patch.set(fields::PERMISSIONS, permissions.to_field(), created);
    }
    if let Some(tenant_name) = &profile.tenant_name {
        patch.set(fields::TENANT_NAME, tenant_name.to_field(), created);
    }
    patch.set(
        fields::CREATED_AT,
        Value::String(now.to_rfc3339()),
        created,
    );

    patch
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Profile after reconciliation (in-memory view, valid even if the write failed).
    pub profile: UserProfile,
    pub patch: ProfilePatch,
    /// Set when the merge write failed. Recoverable on the next sign-in.
    pub write_error: Option<AuthError>,
}

impl Reconciliation {
    pub fn wrote(&self) -> bool {
        !self.patch.is_empty() && self.write_error.is_none()
    }
}

/// Brings a principal's profile in line with its authorization record.
pub struct ProfileReconciler {
    store: Arc<dyn DirectoryStore>,
    collections: Collections,
}

impl ProfileReconciler {
    pub fn new(store: Arc<dyn DirectoryStore>, collections: Collections) -> Self {
        Self { store, collections }
    }

    /// Read the profile, plan the patch, and apply it as a single merge write.
    ///
    /// Read failures propagate. Write failures are returned inside the
    /// [`Reconciliation`] so the caller can carry on with the computed profile.
    pub async fn reconcile(
        &self,
        principal: &Principal,
        record: &AuthorizationRecord,
    ) -> Result<Reconciliation, AuthError> {
        let key = principal.id.as_str();
        let existing: Option<UserProfile> = self
            .store
            .get(&self.collections.profiles, key)
            .await
            .and_then(|doc| doc.map(decode).transpose())
            .map_err(AuthError::DirectoryRead)?;

        let patch = plan(principal, existing.as_ref(), record, Utc::now());
        let profile = patch.profile().clone();

        if patch.is_empty() {
            debug!(principal_id = %principal.id, "profile already reconciled");
            return Ok(Reconciliation {
                profile,
                patch,
                write_error: None,
            });
        }

        let write_error = match self
            .store
            .merge(&self.collections.profiles, key, patch.fields().clone())
            .await
        {
            Ok(()) => {
                debug!(
                    principal_id = %principal.id,
                    created = patch.creates(),
                    fields = patch.fields().len(),
                    "profile reconciled"
                );
                None
            }
            Err(e) => {
                warn!(principal_id = %principal.id, error = %e, "profile write failed");
                Some(AuthError::DirectoryWrite(e))
            }
        };

        Ok(Reconciliation {
            profile,
            patch,
            write_error,
        })
    }
}
