//! The catalog update engine.
//!
//! One update request touches two records: the index record, shared by every product, and the
//! detail record of the request's product. Each attempt reads both, computes their new content
//! from what was read, and writes back whichever changed, conditioned on the versions read. When a
//! write loses against a concurrent writer the attempt is thrown away and the cycle starts over
//! from a fresh read, until the retry budget runs out.
//!
//! Writes are ordered so that the index never names a version without a detail record: additions
//! write the detail record first, removals write the index first.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::active::ActiveDirective;
use crate::layout::ProductTable;
use crate::merge::merge;
use crate::naming::{self, validate_product_name, validate_version};
use crate::retry::RetryPolicy;
use crate::store::{Labels, RecordBody, RecordStore, ResourceVersion, StoreError};
use crate::value::{Mapping, Value};
use crate::{CatalogError, CatalogLocation, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Deep merge the new data into the version's existing data.
    #[default]
    Merge,
    /// Replace the version's data wholesale.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Write { data: Mapping, mode: UpdateMode },
    /// Remove the version from the catalog.
    Delete,
    /// Remove one key from the version's data; the version goes too once nothing is left.
    DeleteKey(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    product: String,
    version: String,
    action: UpdateAction,
    active: ActiveDirective,
}

impl UpdateRequest {
    pub fn write(product: impl Into<String>, version: impl Into<String>, data: Mapping) -> Self {
        Self::new(
            product,
            version,
            UpdateAction::Write {
                data,
                mode: UpdateMode::default(),
            },
        )
    }

    pub fn delete(product: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(product, version, UpdateAction::Delete)
    }

    pub fn delete_key(
        product: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::new(product, version, UpdateAction::DeleteKey(key.into()))
    }

    fn new(product: impl Into<String>, version: impl Into<String>, action: UpdateAction) -> Self {
        Self {
            product: product.into().trim().to_string(),
            version: version.into().trim().to_string(),
            action,
            active: ActiveDirective::None,
        }
    }

    /// Set the write mode. Has no effect on deletions.
    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        if let UpdateAction::Write { mode: current, .. } = &mut self.action {
            *current = mode;
        }
        self
    }

    pub fn with_active(mut self, active: ActiveDirective) -> Self {
        self.active = active;
        self
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn action(&self) -> &UpdateAction {
        &self.action
    }

    pub fn active(&self) -> ActiveDirective {
        self.active
    }

    fn is_removal(&self) -> bool {
        !matches!(self.action, UpdateAction::Write { .. })
    }

    fn validate(&self) -> Result<()> {
        validate_product_name(&self.product)?;
        validate_version(&self.version)?;
        match (&self.action, self.active) {
            (UpdateAction::Delete | UpdateAction::DeleteKey(_), ActiveDirective::SetActive) => {
                Err(CatalogError::configuration(
                    "a version that is being deleted cannot be set active",
                ))
            }
            (UpdateAction::DeleteKey(key), _) if key.trim().is_empty() => {
                Err(CatalogError::configuration("key to delete must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// What an update request did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Read-compute-write cycles used, including the final one.
    pub attempts: usize,
    pub index_written: bool,
    pub detail_written: bool,
}

impl UpdateOutcome {
    /// False when the catalog already reflected the request and nothing was written.
    pub fn changed(&self) -> bool {
        self.index_written || self.detail_written
    }
}

#[derive(Debug)]
enum UpdateState {
    FetchIndex,
    FetchDetail { index: Snapshot },
    Compute { index: Snapshot, detail: Snapshot },
    Write { writes: Vec<PendingWrite> },
    RetryConflict,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Index,
    Detail,
}

/// A record as read during one attempt. `version` is `None` when the record did not exist.
#[derive(Debug)]
struct Snapshot {
    name: String,
    table: ProductTable,
    labels: Labels,
    version: Option<ResourceVersion>,
}

#[derive(Debug)]
struct PendingWrite {
    kind: RecordKind,
    name: String,
    body: RecordBody,
    version: Option<ResourceVersion>,
}

#[derive(Debug)]
pub struct CatalogUpdater {
    store: Arc<dyn RecordStore>,
    location: CatalogLocation,
    retry: RetryPolicy,
}

impl CatalogUpdater {
    pub fn new(store: Arc<dyn RecordStore>, location: CatalogLocation, retry: RetryPolicy) -> Self {
        Self {
            store,
            location,
            retry,
        }
    }

    pub fn location(&self) -> &CatalogLocation {
        &self.location
    }

    /// Apply `request` to the catalog.
    ///
    /// Invalid requests are rejected before the store is touched. A store failure other than a
    /// conflict is returned immediately; conflicts are retried within the [`RetryPolicy`] budget
    /// and surface as [`CatalogError::ConflictExhausted`] once it is spent.
    pub async fn apply(&self, request: &UpdateRequest) -> Result<UpdateOutcome> {
        request.validate()?;
        let detail_name = self.location.product_record_name(&request.product)?;
        let product = request.product.as_str();
        let version = request.version.as_str();

        let mut attempt = 1;
        let mut outcome = UpdateOutcome::default();
        let mut state = UpdateState::FetchIndex;
        loop {
            state = match state {
                UpdateState::FetchIndex => {
                    debug!(product, version, attempt, "fetching index record");
                    let index = self.fetch(self.location.index_name()).await?;
                    UpdateState::FetchDetail { index }
                }
                UpdateState::FetchDetail { index } => {
                    debug!(product, version, attempt, record = %detail_name, "fetching detail record");
                    let detail = self.fetch(&detail_name).await?;
                    UpdateState::Compute { index, detail }
                }
                UpdateState::Compute { index, detail } => {
                    let writes = self.compute(request, index, detail)?;
                    if writes.is_empty() {
                        debug!(product, version, "catalog already up to date");
                        UpdateState::Done
                    } else {
                        UpdateState::Write { writes }
                    }
                }
                UpdateState::Write { writes } => {
                    if self.write(writes, attempt, &mut outcome).await? {
                        UpdateState::Done
                    } else {
                        UpdateState::RetryConflict
                    }
                }
                UpdateState::RetryConflict => {
                    if !self.retry.attempts_remaining(attempt) {
                        warn!(product, version, attempt, "exceeded number of attempts");
                        return Err(CatalogError::ConflictExhausted {
                            product: product.to_string(),
                            version: version.to_string(),
                            attempts: attempt,
                        });
                    }
                    self.retry.pause().await;
                    attempt += 1;
                    UpdateState::FetchIndex
                }
                UpdateState::Done => {
                    outcome.attempts = attempt;
                    info!(
                        product,
                        version,
                        attempts = attempt,
                        changed = outcome.changed(),
                        "catalog update complete"
                    );
                    return Ok(outcome);
                }
            };
        }
    }

    async fn fetch(&self, name: &str) -> Result<Snapshot> {
        match self.store.get(name, self.location.namespace()).await {
            Ok(record) => Ok(Snapshot {
                table: ProductTable::decode(name, &record.body.data)?,
                name: record.name,
                labels: record.body.labels,
                version: Some(record.version),
            }),
            Err(StoreError::NotFound) => {
                debug!(record = name, "record does not exist yet");
                Ok(Snapshot {
                    name: name.to_string(),
                    table: ProductTable::new(),
                    labels: Labels::new(),
                    version: None,
                })
            }
            Err(source) => Err(CatalogError::store(name, source)),
        }
    }

    /// Work out the writes needed to apply `request` on top of the records just read, in the
    /// order they must be made.
    fn compute(
        &self,
        request: &UpdateRequest,
        index: Snapshot,
        detail: Snapshot,
    ) -> Result<Vec<PendingWrite>> {
        let product = request.product.as_str();
        let version = request.version.as_str();
        let mut next_index = index.table.clone();
        let mut next_detail = detail.table.clone();

        match &request.action {
            UpdateAction::Write { data, mode } => {
                let versions = next_detail.product_entry(product);
                let entry = match (mode, versions.get(version)) {
                    (UpdateMode::Merge, Some(Value::Mapping(existing))) => merge(existing, data),
                    _ => data.clone(),
                };
                versions.insert(version.to_string(), Value::Mapping(entry));
                next_index.insert_placeholder(product, version);
            }
            UpdateAction::Delete => {
                next_index.remove_version(product, version, true);
                next_detail.remove_version(product, version, false);
            }
            UpdateAction::DeleteKey(key) => {
                if let Some(Value::Mapping(entry)) = next_detail.version_mut(product, version) {
                    if entry.remove(key).is_some() {
                        debug!(product, version, key = key.as_str(), "removing key");
                    }
                    if entry.is_empty() {
                        debug!(product, version, "no keys left, removing version");
                        next_index.remove_version(product, version, true);
                        next_detail.remove_version(product, version, false);
                    }
                }
            }
        }

        if let Some(versions) = next_detail.versions_mut(product) {
            request.active.enforce(versions, version);
        }

        let index_write = self.pending(RecordKind::Index, index, next_index)?;
        let detail_write = self.pending(RecordKind::Detail, detail, next_detail)?;
        let ordered = if request.is_removal() {
            [index_write, detail_write]
        } else {
            [detail_write, index_write]
        };
        Ok(ordered.into_iter().flatten().collect())
    }

    /// The write turning `read` into `next`, or `None` when they hold the same content.
    fn pending(
        &self,
        kind: RecordKind,
        read: Snapshot,
        next: ProductTable,
    ) -> Result<Option<PendingWrite>> {
        if read.table == next {
            return Ok(None);
        }
        let mut labels = read.labels;
        labels.extend(naming::catalog_labels(self.location.index_name()));
        Ok(Some(PendingWrite {
            kind,
            body: RecordBody {
                data: next.encode(&read.name)?,
                labels,
            },
            name: read.name,
            version: read.version,
        }))
    }

    /// Make `writes` in order. Returns false if one of them lost against a concurrent writer.
    async fn write(
        &self,
        writes: Vec<PendingWrite>,
        attempt: usize,
        outcome: &mut UpdateOutcome,
    ) -> Result<bool> {
        let namespace = self.location.namespace();
        for write in writes {
            let result = match &write.version {
                Some(version) => {
                    debug!(record = %write.name, %version, attempt, "updating record");
                    self.store
                        .update(&write.name, namespace, write.body, version)
                        .await
                }
                None => {
                    debug!(record = %write.name, attempt, "creating record");
                    self.store.create(&write.name, namespace, write.body).await
                }
            };
            match result {
                Ok(_) => match write.kind {
                    RecordKind::Index => outcome.index_written = true,
                    RecordKind::Detail => outcome.detail_written = true,
                },
                // NotFound on update means the record was deleted after it was read. On create it
                // is a property of the store (a missing namespace) and is not retried.
                Err(e)
                    if e.is_conflict()
                        || (write.version.is_some() && matches!(e, StoreError::NotFound)) =>
                {
                    warn!(record = %write.name, attempt, error = %e, "conflict writing record, retrying");
                    return Ok(false);
                }
                Err(source) => return Err(CatalogError::store(write.name, source)),
            }
        }
        Ok(true)
    }
}
