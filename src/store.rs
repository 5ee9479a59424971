//! API key repository
//!
//! `ApiKeyRepository` is the lookup contract the authentication engine consumes.
//! Storage collaborators implement it; `InMemoryApiKeyStore` is the reference
//! implementation, indexed both by record id and by key value.
//!
//! Both indexes of one store live behind a single mutex. Every mutation and every
//! multi-step read runs inside that critical section, so no caller can observe a
//! key that points at an evicted id.

use crate::hasher;
use crate::record::ApiKeyRecord;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Duplicate key for record {0}")]
    DuplicateKey(Uuid),
    #[error("Duplicate id: {0}")]
    DuplicateId(Uuid),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Lookup and lifecycle operations for issued keys.
///
/// Not-found is never an error: lookups return `Ok(None)` and removals of unknown
/// ids or keys are no-ops. `Err` is reserved for backend failures.
#[async_trait::async_trait]
pub trait ApiKeyRepository<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Issue a new key for `consumer`. The returned key is the only time it is handed out.
    async fn create(
        &self,
        consumer: &str,
        external_id: E,
        roles: Vec<String>,
    ) -> Result<(Uuid, String)>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord<E>>>;

    /// Backends should index by key; this is the hot path for every request.
    async fn get_by_key(&self, key: &str) -> Result<Option<ApiKeyRecord<E>>>;

    async fn remove_by_id(&self, id: Uuid) -> Result<()>;

    async fn remove_by_key(&self, key: &str) -> Result<()>;

    /// Remove every record owned by `consumer` (exact match). Returns how many were removed.
    async fn remove_all_for_consumer(&self, consumer: &str) -> Result<usize>;

    /// Replace the external id of an existing record. Returns false if the id is unknown.
    async fn update_external_id(&self, id: Uuid, external_id: E) -> Result<bool>;

    async fn list(&self) -> Result<Vec<ApiKeyRecord<E>>>;
}

struct Indexes<E> {
    by_id: HashMap<Uuid, ApiKeyRecord<E>>,
    id_by_key: HashMap<String, Uuid>,
}

impl<E> Indexes<E> {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            id_by_key: HashMap::new(),
        }
    }

    fn insert(&mut self, rec: ApiKeyRecord<E>) -> Result<()> {
        if rec.is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "record {} has a nil id or an empty key",
                rec.id()
            )));
        }
        if self.by_id.contains_key(&rec.id()) {
            return Err(StoreError::DuplicateId(rec.id()));
        }
        if let Some(existing) = self.id_by_key.get(rec.key()) {
            return Err(StoreError::DuplicateKey(*existing));
        }
        self.id_by_key.insert(rec.key().to_string(), rec.id());
        self.by_id.insert(rec.id(), rec);
        Ok(())
    }

    fn remove_id(&mut self, id: &Uuid) -> bool {
        match self.by_id.remove(id) {
            Some(rec) => {
                self.id_by_key.remove(rec.key());
                true
            }
            None => false,
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        match self.id_by_key.remove(key) {
            Some(id) => {
                self.by_id.remove(&id);
                true
            }
            None => false,
        }
    }
}

/// In-memory repository with id and key indexes behind one lock.
pub struct InMemoryApiKeyStore<E> {
    inner: Mutex<Indexes<E>>,
}

impl<E> Default for InMemoryApiKeyStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryApiKeyStore<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Indexes::new()),
        }
    }

    /// Build a store pre-populated with existing records.
    ///
    /// Fails on empty records and on duplicate ids or keys.
    pub fn with_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = ApiKeyRecord<E>>,
    {
        let mut indexes = Indexes::new();
        for rec in records {
            indexes.insert(rec)?;
        }
        let len = indexes.by_id.len();
        if len > 0 {
            info!(
                "API key store seeded with {} entr{}",
                len,
                if len == 1 { "y" } else { "ies" }
            );
        }
        Ok(Self {
            inner: Mutex::new(indexes),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Indexes<E>>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Storage(format!("Lock error: {}", e)))
    }

    /// Number of stored records. Fails only if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait::async_trait]
impl<E> ApiKeyRepository<E> for InMemoryApiKeyStore<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn create(
        &self,
        consumer: &str,
        external_id: E,
        roles: Vec<String>,
    ) -> Result<(Uuid, String)> {
        let key = hasher::generate_key();
        let rec = ApiKeyRecord::new(
            Uuid::new_v4(),
            consumer,
            key.clone(),
            external_id,
            Utc::now(),
            roles,
        );
        let id = rec.id();

        self.lock()?.insert(rec).inspect_err(|e| {
            warn!(consumer = consumer, "API key create rejected: {}", e);
        })?;

        debug!(%id, consumer = consumer, "API key created");
        Ok((id, key))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord<E>>> {
        Ok(self.lock()?.by_id.get(&id).cloned())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<ApiKeyRecord<E>>> {
        let guard = self.lock()?;
        Ok(guard
            .id_by_key
            .get(key)
            .and_then(|id| guard.by_id.get(id))
            .cloned())
    }

    async fn remove_by_id(&self, id: Uuid) -> Result<()> {
        if self.lock()?.remove_id(&id) {
            debug!(%id, "API key removed by id");
        }
        Ok(())
    }

    async fn remove_by_key(&self, key: &str) -> Result<()> {
        if self.lock()?.remove_key(key) {
            debug!("API key removed by key");
        }
        Ok(())
    }

    async fn remove_all_for_consumer(&self, consumer: &str) -> Result<usize> {
        let mut guard = self.lock()?;
        let ids: Vec<Uuid> = guard
            .by_id
            .values()
            .filter(|rec| rec.consumer() == consumer)
            .map(|rec| rec.id())
            .collect();
        let removed = ids.iter().filter(|id| guard.remove_id(id)).count();
        drop(guard);

        if removed > 0 {
            info!(consumer, removed, "API keys removed for consumer");
        }
        Ok(removed)
    }

    async fn update_external_id(&self, id: Uuid, external_id: E) -> Result<bool> {
        match self.lock()?.by_id.get_mut(&id) {
            Some(rec) => {
                rec.set_external_id(external_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord<E>>> {
        Ok(self.lock()?.by_id.values().cloned().collect())
    }
}
