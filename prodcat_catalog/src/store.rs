//! The interface to the backing key-value store.
//!
//! A record is a named, namespaced map of string keys to string documents with a set of labels.
//! Every read returns an opaque [`ResourceVersion`]; an update conditioned on a stale version fails
//! with [`StoreError::Conflict`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

pub mod mem;

pub type RecordData = BTreeMap<String, String>;
pub type Labels = BTreeMap<String, String>;

/// Opaque version stamp of a record, changed by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The writable part of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBody {
    pub data: RecordData,
    pub labels: Labels,
}

/// A record as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub body: RecordBody,
    pub version: ResourceVersion,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record was modified since it was read")]
    Conflict,

    #[error("record already exists")]
    AlreadyExists,

    #[error("store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn unavailable(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unavailable(error.into())
    }

    /// True for the errors that mean "someone else got there first".
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict | Self::AlreadyExists)
    }
}

/// An equality-based label selector, `key=value[,key=value...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(Labels);

impl LabelSelector {
    pub fn new(labels: Labels) -> Self {
        Self(labels)
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait RecordStore: fmt::Debug + Send + Sync + 'static {
    /// Read a record, or [`StoreError::NotFound`].
    async fn get(&self, name: &str, namespace: &str) -> Result<Record, StoreError>;

    /// Create a record, or [`StoreError::AlreadyExists`].
    async fn create(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
    ) -> Result<Record, StoreError>;

    /// Replace the data and labels of a record, conditioned on `version` still being current.
    async fn update(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
        version: &ResourceVersion,
    ) -> Result<Record, StoreError>;

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), StoreError>;

    /// Names of the records in `namespace` matching `selector`, sorted.
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<String>, StoreError>;
}

/// Read a record, mapping [`StoreError::NotFound`] to `None`.
pub async fn get_optional(
    store: &dyn RecordStore,
    name: &str,
    namespace: &str,
) -> Result<Option<Record>, StoreError> {
    match store.get(name, namespace).await {
        Ok(record) => Ok(Some(record)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}
