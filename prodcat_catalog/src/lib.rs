//! Concurrent-safe inventory of installed products, stored as records in a shared key-value
//! configuration store.
//!
//! The catalog is split across an index record, listing every known product and version, and one
//! detail record per product holding the installer-supplied metadata of each version. Writers
//! never coordinate with each other in-process: every change is a read-modify-write cycle against
//! the store's version-stamped conditional update, recomputed from a fresh read on conflict.

use std::fmt;

pub mod active;
pub mod layout;
pub mod merge;
pub mod migrate;
pub mod naming;
pub mod query;
pub mod retry;
pub mod store;
pub mod update;
pub mod value;

pub use active::ActiveDirective;
pub use migrate::{LegacyPolicy, MigrationError, MigrationOutcome, Migrator};
pub use query::{InstalledProductVersion, ProductCatalog};
pub use retry::RetryPolicy;
pub use store::{RecordStore, StoreError};
pub use update::{CatalogUpdater, UpdateAction, UpdateMode, UpdateOutcome, UpdateRequest};
pub use value::{Mapping, Value};

/// Default name of the index record.
pub const DEFAULT_INDEX_NAME: &str = "product-catalog";

/// Default namespace holding the catalog records.
pub const DEFAULT_NAMESPACE: &str = "services";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "update of {product}/{version} still conflicting after {attempts} attempts, catalog was not updated"
    )]
    ConflictExhausted {
        product: String,
        version: String,
        attempts: usize,
    },

    #[error("record store unavailable while accessing {record}: {source}")]
    StoreUnavailable {
        record: String,
        #[source]
        source: StoreError,
    },

    #[error("no installed product {product} matching version {version}")]
    NotInstalled { product: String, version: String },

    #[error("record {record} holds malformed data under key {key:?}: {reason}")]
    MalformedRecord {
        record: String,
        key: String,
        reason: String,
    },
}

impl CatalogError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn store(record: impl Into<String>, source: StoreError) -> Self {
        Self::StoreUnavailable {
            record: record.into(),
            source,
        }
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Where the catalog lives: the name of its index record and the namespace of all its records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogLocation {
    index_name: String,
    namespace: String,
}

impl CatalogLocation {
    pub fn new(index_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the detail record holding the data of `product`.
    pub fn product_record_name(&self, product: &str) -> Result<String> {
        naming::product_record_name(&self.index_name, product)
    }
}

impl Default for CatalogLocation {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE)
    }
}

impl fmt::Display for CatalogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.index_name)
    }
}
