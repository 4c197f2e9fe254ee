use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use concierge_auth::{DirectoryStore, Document, StoreError};

type Collection = BTreeMap<String, Document>;

/// In-memory document directory for tests/dev.
///
/// - Collections are created on first write
/// - `merge` replaces top-level fields only, like a partial upsert
/// - Read/write failures can be injected, and single keys can be held so a
///   read stays pending until released
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<HashMap<String, Collection>>,
    faults: RwLock<Faults>,
    holds: RwLock<HashMap<(String, String), watch::Receiver<bool>>>,
    writes: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    read: Option<StoreError>,
    write: Option<StoreError>,
}

/// Keeps reads of one key pending until released (or dropped).
#[derive(Debug)]
pub struct ReadHold {
    release: watch::Sender<bool>,
}

impl ReadHold {
    pub fn release(self) {}
}

impl Drop for ReadHold {
    fn drop(&mut self) {
        let _ = self.release.send(true);
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from `{ "<collection>": { "<key>": { ...document } } }`.
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let seed: HashMap<String, Collection> =
            serde_json::from_str(json).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(Self {
            inner: RwLock::new(seed),
            ..Self::default()
        })
    }

    /// Insert or replace a whole document without counting it as a write.
    pub fn seed(&self, collection: &str, key: &str, document: Value) {
        let Value::Object(doc) = document else {
            return;
        };
        if let Ok(mut map) = self.inner.write() {
            map.entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), doc);
        }
    }

    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        let map = self.inner.read().ok()?;
        map.get(collection)?.get(key).cloned()
    }

    /// Number of successful `merge` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, error: Option<StoreError>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.read = error;
        }
    }

    pub fn fail_writes(&self, error: Option<StoreError>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.write = error;
        }
    }

    pub fn hold(&self, collection: &str, key: &str) -> ReadHold {
        let (tx, rx) = watch::channel(false);
        if let Ok(mut holds) = self.holds.write() {
            holds.insert((collection.to_string(), key.to_string()), rx);
        }
        ReadHold { release: tx }
    }

    async fn before_read(&self, collection: &str, key: Option<&str>) -> Result<(), StoreError> {
        if let Some(key) = key {
            let held = self
                .holds
                .read()
                .ok()
                .and_then(|h| h.get(&(collection.to_string(), key.to_string())).cloned());
            if let Some(mut rx) = held {
                // Sender dropped counts as released.
                let _ = rx.wait_for(|released| *released).await;
            }
        }

        let faults = self
            .faults
            .read()
            .map_err(|_| StoreError::Unavailable("fault table poisoned".into()))?;
        match &faults.read {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        self.before_read(collection, Some(key)).await?;
        Ok(self.document(collection, key))
    }

    async fn find_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.before_read(collection, None).await?;
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("directory poisoned".into()))?;

        Ok(map
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.get(field).and_then(Value::as_str) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn merge(&self, collection: &str, key: &str, fields: Document) -> Result<(), StoreError> {
        if let Some(err) = self
            .faults
            .read()
            .map_err(|_| StoreError::Unavailable("fault table poisoned".into()))?
            .write
            .clone()
        {
            return Err(err);
        }

        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("directory poisoned".into()))?;
        let doc = map
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        for (field, value) in fields {
            doc.insert(field, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
