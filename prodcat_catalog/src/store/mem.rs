//! In-memory implementation of [`RecordStore`]. It honours the full contract, version stamps and
//! conflicts included, and is used for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LabelSelector, Record, RecordBody, RecordStore, ResourceVersion, StoreError};

#[derive(Debug, Default)]
pub struct MemRecordStore {
    records: Mutex<HashMap<(String, String), Record>>,
    last_version: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful create, update and delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Read a record without going through the async interface.
    pub fn snapshot(&self, name: &str, namespace: &str) -> Option<Record> {
        self.records
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store switched off"));
        }
        Ok(())
    }

    fn next_version(&self) -> ResourceVersion {
        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        ResourceVersion::new(version.to_string())
    }

    fn key(name: &str, namespace: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }
}

#[async_trait]
impl RecordStore for MemRecordStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Record, StoreError> {
        self.check_available()?;
        self.snapshot(name, namespace).ok_or(StoreError::NotFound)
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
    ) -> Result<Record, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock();
        let key = Self::key(name, namespace);
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let record = Record {
            name: name.to_string(),
            body,
            version: self.next_version(),
        };
        records.insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
        version: &ResourceVersion,
    ) -> Result<Record, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock();
        let Some(existing) = records.get_mut(&Self::key(name, namespace)) else {
            return Err(StoreError::NotFound);
        };
        if &existing.version != version {
            return Err(StoreError::Conflict);
        }
        existing.body = body;
        existing.version = self.next_version();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(existing.clone())
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), StoreError> {
        self.check_available()?;
        match self.records.lock().remove(&Self::key(name, namespace)) {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let mut names: Vec<_> = self
            .records
            .lock()
            .iter()
            .filter(|((ns, _), record)| ns == namespace && selector.matches(&record.body.labels))
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
