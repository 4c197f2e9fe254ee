//! Directory records the engine reads and writes.
//!
//! Every attribute is optional: documents are written by several flows (and by
//! hand), so presence is modeled explicitly instead of assumed. Field names are
//! snake_case on write; the camelCase names used by older documents are
//! accepted on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use concierge_core::TenantId;

use crate::{Permission, Role};

/// Document field names used in profile patches.
pub mod fields {
    pub const EMAIL: &str = "email";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const AVATAR_URL: &str = "avatar_url";
    pub const TENANT_ID: &str = "tenant_id";
    pub const ROLE: &str = "role";
    pub const PERMISSIONS: &str = "permissions";
    pub const TENANT_NAME: &str = "tenant_name";
    pub const CREATED_AT: &str = "created_at";
}

/// Allowlist entry: which tenant and role an email is admitted under.
///
/// Keyed by lowercased email; legacy entries are found by their `email` field.
/// Read-only from the engine's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawRecord")]
pub struct AuthorizationRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
}

/// Per-principal profile document, keyed by principal id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawProfile")]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Tenant directory entry, keyed by tenant id. Never written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TenantRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// Wire shapes. A merge write adds the snake_case key next to a legacy
// camelCase one, so both may be present; snake_case wins.

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "tenant_or_none")]
    tenant_id: Option<TenantId>,
    #[serde(default, rename = "companyId", deserialize_with = "tenant_or_none")]
    legacy_tenant_id: Option<TenantId>,
    #[serde(default, deserialize_with = "role_or_none")]
    role: Option<Role>,
    #[serde(default)]
    permissions: Option<Vec<Permission>>,
    #[serde(default)]
    tenant_name: Option<String>,
    #[serde(default, rename = "companyName")]
    legacy_tenant_name: Option<String>,
}

impl From<RawRecord> for AuthorizationRecord {
    fn from(raw: RawRecord) -> Self {
        Self {
            email: raw.email,
            tenant_id: raw.tenant_id.or(raw.legacy_tenant_id),
            role: raw.role,
            permissions: raw.permissions,
            tenant_name: raw.tenant_name.or(raw.legacy_tenant_name),
        }
    }
}

#[derive(Deserialize)]
struct RawProfile {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default, rename = "displayName")]
    legacy_display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default, rename = "photoURL")]
    legacy_avatar_url: Option<String>,
    #[serde(default, deserialize_with = "tenant_or_none")]
    tenant_id: Option<TenantId>,
    #[serde(default, rename = "companyId", deserialize_with = "tenant_or_none")]
    legacy_tenant_id: Option<TenantId>,
    #[serde(default, deserialize_with = "role_or_none")]
    role: Option<Role>,
    #[serde(default)]
    permissions: Option<Vec<Permission>>,
    #[serde(default)]
    tenant_name: Option<String>,
    #[serde(default, rename = "companyName")]
    legacy_tenant_name: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "createdAt")]
    legacy_created_at: Option<DateTime<Utc>>,
}

impl From<RawProfile> for UserProfile {
    fn from(raw: RawProfile) -> Self {
        Self {
            email: raw.email,
            display_name: raw.display_name.or(raw.legacy_display_name),
            avatar_url: raw.avatar_url.or(raw.legacy_avatar_url),
            tenant_id: raw.tenant_id.or(raw.legacy_tenant_id),
            role: raw.role,
            permissions: raw.permissions,
            tenant_name: raw.tenant_name.or(raw.legacy_tenant_name),
            created_at: raw.created_at.or(raw.legacy_created_at),
        }
    }
}

fn tenant_or_none<'de, D>(deserializer: D) -> Result<Option<TenantId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| TenantId::new(s).ok()))
}

fn role_or_none<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(Role::new))
}
