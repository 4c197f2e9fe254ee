//! Directory store boundary (document store collaborator).
//!
//! The engine needs three operations over three logical collections: keyed
//! get, equality query on a field, and a merge write that only touches the
//! fields it is given.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Directory store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("malformed document: {0}")]
    Decode(String),
}

/// Names of the collections the engine touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collections {
    /// Allowlist, keyed by normalized email and scannable on `email`.
    pub allowlist: String,
    /// Profiles, keyed by principal id.
    pub profiles: String,
    /// Tenant directory, keyed by tenant id.
    pub tenants: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            allowlist: "allowed_users".to_string(),
            profiles: "users".to_string(),
            tenants: "companies".to_string(),
        }
    }
}

/// Document store used for allowlist, profile and tenant lookups.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Fetch one document by key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    /// All documents whose `field` equals `value`.
    async fn find_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError>;

    /// Merge `fields` into the document at `key`, creating it if absent.
    /// Fields not named in `fields` are left untouched.
    async fn merge(&self, collection: &str, key: &str, fields: Document) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> DirectoryStore for Arc<S>
where
    S: DirectoryStore + ?Sized,
{
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        (**self).get(collection, key).await
    }

    async fn find_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        (**self).find_equal(collection, field, value).await
    }

    async fn merge(&self, collection: &str, key: &str, fields: Document) -> Result<(), StoreError> {
        (**self).merge(collection, key, fields).await
    }
}

/// Decode a stored document into a typed record.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Decode(e.to_string()))
}
