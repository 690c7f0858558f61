//! Migration from the legacy layout, where one record holds the full metadata of every product,
//! to an index record plus one detail record per product.
//!
//! Migration may run on every upgrade and alongside installers writing the new layout, so it has
//! to be idempotent and must not clobber concurrent writes. Every target record is rebuilt by
//! folding the legacy content underneath what the record currently holds, which makes a re-run
//! after a partial failure converge on the same state. Only once every target record is written is
//! the legacy record marked (or deleted), so a failed migration is simply run again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::layout::ProductTable;
use crate::naming::{self, MIGRATED_LABEL_KEY, MIGRATED_LABEL_VALUE, is_migrated};
use crate::retry::RetryPolicy;
use crate::store::{Labels, Record, RecordBody, RecordStore, StoreError, get_optional};
use crate::CatalogError;

/// What happens to the legacy record once its content lives in the new layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LegacyPolicy {
    /// Keep the legacy record and its entries for readers that still expect it, and mark it.
    #[default]
    Retain,
    /// Delete the legacy record; the index record carries the marker instead.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated { products: usize },
    AlreadyMigrated,
    /// Neither a legacy record nor a migrated index record exists. Nothing to do.
    NoLegacyRecord,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid migration configuration: {0}")]
    Configuration(String),

    #[error("failed to read record {record}: {source}")]
    Read {
        record: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write index record {record}: {source}")]
    WriteIndex {
        record: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write record {record} for product {product}: {source}")]
    WriteDetail {
        product: String,
        record: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to mark legacy record {record}: {source}")]
    MarkLegacy {
        record: String,
        #[source]
        source: StoreError,
    },

    #[error("record {record} still conflicting after {attempts} attempts, migration not complete")]
    Conflict { record: String, attempts: usize },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Which target record a write is for, to give errors their context.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Index,
    Detail { product: &'a str },
    Legacy,
}

impl Target<'_> {
    fn error(self, record: &str, source: StoreError) -> MigrationError {
        let record = record.to_string();
        match self {
            Self::Index => MigrationError::WriteIndex { record, source },
            Self::Detail { product } => MigrationError::WriteDetail {
                product: product.to_string(),
                record,
                source,
            },
            Self::Legacy => MigrationError::MarkLegacy { record, source },
        }
    }
}

/// Legacy content split into the new layout.
#[derive(Debug)]
struct Partition {
    index: ProductTable,
    details: Vec<DetailPlan>,
}

#[derive(Debug)]
struct DetailPlan {
    product: String,
    record: String,
    table: ProductTable,
}

#[derive(Debug)]
enum MigrationState {
    CheckMarker,
    Partition { legacy: Record },
    WriteIndex { legacy: Record, partition: Partition },
    WriteDetails { legacy: Record, partition: Partition },
    MarkComplete { legacy: Record, partition: Partition },
    /// The legacy record changed after it was read, start over.
    Restart,
    Done(MigrationOutcome),
}

#[derive(Debug)]
pub struct Migrator {
    store: Arc<dyn RecordStore>,
    index_name: String,
    retry: RetryPolicy,
    policy: LegacyPolicy,
}

impl Migrator {
    pub fn new(store: Arc<dyn RecordStore>, index_name: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            index_name: index_name.into(),
            retry,
            policy: LegacyPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LegacyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Migrate the legacy record `legacy_name` in `namespace`.
    ///
    /// When `legacy_name` is also the name of the index record, the record is converted in place
    /// once the detail records are written.
    pub async fn migrate(
        &self,
        legacy_name: &str,
        namespace: &str,
    ) -> Result<MigrationOutcome, MigrationError> {
        self.validate(legacy_name)?;
        let in_place = legacy_name == self.index_name;
        info!(
            legacy = legacy_name,
            index = %self.index_name,
            namespace,
            in_place,
            policy = ?self.policy,
            "starting catalog migration"
        );

        let mut attempt = 1;
        let mut state = MigrationState::CheckMarker;
        loop {
            state = match state {
                MigrationState::CheckMarker => self.check_marker(legacy_name, namespace).await?,
                MigrationState::Partition { legacy } => {
                    let partition = self.partition(&legacy)?;
                    debug!(
                        legacy = legacy_name,
                        products = partition.details.len(),
                        "partitioned legacy record"
                    );
                    if in_place {
                        MigrationState::WriteDetails { legacy, partition }
                    } else {
                        MigrationState::WriteIndex { legacy, partition }
                    }
                }
                MigrationState::WriteIndex { legacy, partition } => {
                    self.converge(
                        Target::Index,
                        &self.index_name,
                        namespace,
                        &partition.index,
                        naming::catalog_labels(&self.index_name),
                    )
                    .await?;
                    MigrationState::WriteDetails { legacy, partition }
                }
                MigrationState::WriteDetails { legacy, partition } => {
                    for detail in &partition.details {
                        self.converge(
                            Target::Detail {
                                product: &detail.product,
                            },
                            &detail.record,
                            namespace,
                            &detail.table,
                            naming::catalog_labels(&self.index_name),
                        )
                        .await?;
                    }
                    MigrationState::MarkComplete { legacy, partition }
                }
                MigrationState::MarkComplete { legacy, partition } => {
                    let products = partition.details.len();
                    let marked = if in_place {
                        self.convert_in_place(legacy, partition, namespace).await?
                    } else {
                        self.mark_complete(legacy, namespace).await?
                    };
                    if marked {
                        MigrationState::Done(MigrationOutcome::Migrated { products })
                    } else {
                        MigrationState::Restart
                    }
                }
                MigrationState::Restart => {
                    if !self.retry.attempts_remaining(attempt) {
                        warn!(legacy = legacy_name, attempt, "exceeded number of attempts");
                        return Err(MigrationError::Conflict {
                            record: legacy_name.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(legacy = legacy_name, attempt, "legacy record changed during migration, restarting");
                    self.retry.pause().await;
                    attempt += 1;
                    MigrationState::CheckMarker
                }
                MigrationState::Done(outcome) => {
                    info!(legacy = legacy_name, ?outcome, "catalog migration finished");
                    return Ok(outcome);
                }
            };
        }
    }

    fn validate(&self, legacy_name: &str) -> Result<(), MigrationError> {
        if legacy_name.is_empty() {
            return Err(MigrationError::Configuration(
                "legacy record name is required".to_string(),
            ));
        }
        if self.index_name.is_empty() {
            return Err(MigrationError::Configuration(
                "index record name is required".to_string(),
            ));
        }
        if legacy_name == self.index_name && self.policy == LegacyPolicy::Delete {
            return Err(MigrationError::Configuration(format!(
                "legacy record {legacy_name} is also the index record and cannot be deleted"
            )));
        }
        Ok(())
    }

    async fn check_marker(
        &self,
        legacy_name: &str,
        namespace: &str,
    ) -> Result<MigrationState, MigrationError> {
        let read = |record: &str, source| MigrationError::Read {
            record: record.to_string(),
            source,
        };
        let legacy = get_optional(self.store.as_ref(), legacy_name, namespace)
            .await
            .map_err(|e| read(legacy_name, e))?;

        match legacy {
            Some(legacy) if is_migrated(&legacy.body.labels) => {
                debug!(legacy = legacy_name, "migration marker present");
                Ok(MigrationState::Done(MigrationOutcome::AlreadyMigrated))
            }
            Some(legacy) => Ok(MigrationState::Partition { legacy }),
            None => {
                // a deleted legacy record leaves the marker on the index
                let index = get_optional(self.store.as_ref(), &self.index_name, namespace)
                    .await
                    .map_err(|e| read(&self.index_name, e))?;
                let outcome = match index {
                    Some(index) if is_migrated(&index.body.labels) => {
                        MigrationOutcome::AlreadyMigrated
                    }
                    _ => MigrationOutcome::NoLegacyRecord,
                };
                debug!(legacy = legacy_name, ?outcome, "legacy record not found");
                Ok(MigrationState::Done(outcome))
            }
        }
    }

    /// Split the legacy content into index placeholders and one table per product. Every product
    /// name is checked here, before anything is written.
    fn partition(&self, legacy: &Record) -> Result<Partition, MigrationError> {
        let table = ProductTable::decode(&legacy.name, &legacy.body.data)?;
        let mut index = ProductTable::new();
        let mut details = Vec::new();
        for (product, versions) in table.products() {
            let record = naming::product_record_name(&self.index_name, product)?;
            index.product_entry(product);
            for version in versions.keys() {
                index.insert_placeholder(product, version);
            }
            let mut detail = ProductTable::new();
            detail.insert_product(product, versions.clone());
            details.push(DetailPlan {
                product: product.to_string(),
                record,
                table: detail,
            });
        }
        Ok(Partition { index, details })
    }

    /// Make `record` hold at least `table`, keeping whatever it already holds on top, and carry
    /// `labels`. Retries on conflict within the retry budget.
    async fn converge(
        &self,
        target: Target<'_>,
        record: &str,
        namespace: &str,
        table: &ProductTable,
        labels: Labels,
    ) -> Result<(), MigrationError> {
        let mut attempt = 1;
        loop {
            let current = get_optional(self.store.as_ref(), record, namespace)
                .await
                .map_err(|source| MigrationError::Read {
                    record: record.to_string(),
                    source,
                })?;

            let updating = current.is_some();
            let result = match current {
                Some(current) => {
                    let existing = ProductTable::decode(record, &current.body.data)?;
                    let next = table.merged_under(&existing);
                    let mut next_labels = current.body.labels.clone();
                    next_labels.extend(labels.clone());
                    if next == existing && next_labels == current.body.labels {
                        debug!(record, "record already up to date");
                        return Ok(());
                    }
                    debug!(record, version = %current.version, attempt, "updating record");
                    let body = RecordBody {
                        data: next.encode(record)?,
                        labels: next_labels,
                    };
                    self.store
                        .update(record, namespace, body, &current.version)
                        .await
                }
                None => {
                    debug!(record, attempt, "creating record");
                    let body = RecordBody {
                        data: table.encode(record)?,
                        labels: labels.clone(),
                    };
                    self.store.create(record, namespace, body).await
                }
            };

            match result {
                Ok(_) => return Ok(()),
                // NotFound is only a lost race when the record read above has since been deleted
                Err(e) if e.is_conflict() || (updating && matches!(e, StoreError::NotFound)) => {
                    if !self.retry.attempts_remaining(attempt) {
                        return Err(MigrationError::Conflict {
                            record: record.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(record, attempt, error = %e, "conflict writing record, retrying");
                    self.retry.pause().await;
                    attempt += 1;
                }
                Err(source) => return Err(target.error(record, source)),
            }
        }
    }

    /// Mark a legacy record that is not the index. Returns false if the legacy record changed
    /// since it was partitioned.
    async fn mark_complete(&self, legacy: Record, namespace: &str) -> Result<bool, MigrationError> {
        self.converge(
            Target::Index,
            &self.index_name,
            namespace,
            &ProductTable::new(),
            naming::catalog_labels(&self.index_name)
                .into_iter()
                .chain(marker_labels())
                .collect(),
        )
        .await?;

        match self.policy {
            LegacyPolicy::Retain => {
                let mut body = legacy.body;
                body.labels.extend(marker_labels());
                let result = self
                    .store
                    .update(&legacy.name, namespace, body, &legacy.version)
                    .await;
                self.finish_legacy_write(&legacy.name, result.map(|_| ()))
            }
            LegacyPolicy::Delete => {
                // deletes are unconditional, so check the legacy record is still the one
                // partitioned right before deleting it
                let current = get_optional(self.store.as_ref(), &legacy.name, namespace)
                    .await
                    .map_err(|source| MigrationError::Read {
                        record: legacy.name.clone(),
                        source,
                    })?;
                match current {
                    None => {
                        debug!(legacy = %legacy.name, "legacy record already deleted");
                        return Ok(true);
                    }
                    Some(current) if current.version != legacy.version => {
                        debug!(
                            legacy = %legacy.name,
                            partitioned = %legacy.version,
                            current = %current.version,
                            "legacy record changed"
                        );
                        return Ok(false);
                    }
                    Some(_) => {}
                }
                match self.store.delete(&legacy.name, namespace).await {
                    Ok(()) | Err(StoreError::NotFound) => {
                        info!(legacy = %legacy.name, "deleted legacy record");
                        Ok(true)
                    }
                    Err(source) => Err(Target::Legacy.error(&legacy.name, source)),
                }
            }
        }
    }

    /// Rewrite a legacy record that is also the index record into the index layout and mark it,
    /// in one conditional update. Returns false if the record changed since it was partitioned.
    async fn convert_in_place(
        &self,
        legacy: Record,
        partition: Partition,
        namespace: &str,
    ) -> Result<bool, MigrationError> {
        let mut labels = legacy.body.labels;
        labels.extend(naming::catalog_labels(&self.index_name));
        labels.extend(marker_labels());
        let body = RecordBody {
            data: partition.index.encode(&legacy.name)?,
            labels,
        };
        let result = self
            .store
            .update(&legacy.name, namespace, body, &legacy.version)
            .await;
        self.finish_legacy_write(&legacy.name, result.map(|_| ()))
    }

    fn finish_legacy_write(
        &self,
        legacy_name: &str,
        result: Result<(), StoreError>,
    ) -> Result<bool, MigrationError> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() || matches!(e, StoreError::NotFound) => {
                debug!(legacy = legacy_name, error = %e, "legacy record changed");
                Ok(false)
            }
            Err(source) => Err(Target::Legacy.error(legacy_name, source)),
        }
    }
}

fn marker_labels() -> Labels {
    Labels::from([(
        MIGRATED_LABEL_KEY.to_string(),
        MIGRATED_LABEL_VALUE.to_string(),
    )])
}
