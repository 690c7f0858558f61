use std::sync::Arc;

use clap::Parser;
use prodcat_catalog::store::StoreError;
use prodcat_catalog::{CatalogError, CatalogUpdater, RecordStore, UpdateOutcome, UpdateRequest};
use prodcat_clap_blocks::catalog::CatalogConfig;
use prodcat_clap_blocks::retry::UpdateRetryConfig;
use tracing::info;

use super::common;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("unable to connect to the record store: {0}")]
    Connect(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    catalog: CatalogConfig,

    #[clap(flatten)]
    retry: UpdateRetryConfig,

    /// Name of the product
    #[clap(long = "product", env = "PRODUCT")]
    product: String,

    /// Version of the product to remove
    #[clap(long = "product-version", env = "PRODUCT_VERSION")]
    version: String,

    /// Remove only this key from the data of the version
    #[clap(long = "key", env = "KEY")]
    key: Option<String>,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let store = common::connect().await?;
    run(config, store).await?;
    Ok(())
}

pub(crate) async fn run(config: Config, store: Arc<dyn RecordStore>) -> Result<UpdateOutcome> {
    let request = match config.key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            UpdateRequest::delete_key(&config.product, &config.version, key)
        }
        _ => UpdateRequest::delete(&config.product, &config.version),
    };
    let updater = CatalogUpdater::new(store, config.catalog.location(), config.retry.policy());
    let outcome = updater.apply(&request).await?;
    info!(
        product = request.product(),
        version = request.version(),
        key = config.key.as_deref(),
        changed = outcome.changed(),
        "removed from product catalog"
    );
    Ok(outcome)
}
