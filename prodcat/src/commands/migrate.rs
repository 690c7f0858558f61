use std::sync::Arc;

use clap::{Parser, ValueEnum};
use prodcat_catalog::store::StoreError;
use prodcat_catalog::{LegacyPolicy, MigrationError, MigrationOutcome, Migrator, RecordStore};
use prodcat_clap_blocks::catalog::CatalogConfig;
use prodcat_clap_blocks::retry::MigrationRetryConfig;
use tracing::info;

use super::common;

/// Name of the ConfigMap holding the catalog before the index/detail split.
const DEFAULT_LEGACY_CONFIG_MAP: &str = "cray-product-catalog";

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("unable to connect to the record store: {0}")]
    Connect(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Keep the legacy ConfigMap and label it as migrated
    #[default]
    Retain,
    /// Delete the legacy ConfigMap once its content is migrated
    Delete,
}

impl From<Policy> for LegacyPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Retain => Self::Retain,
            Policy::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    catalog: CatalogConfig,

    #[clap(flatten)]
    retry: MigrationRetryConfig,

    /// Name of the ConfigMap holding the catalog in the legacy layout
    #[clap(
        long = "legacy-config-map",
        env = "LEGACY_CONFIG_MAP",
        default_value = DEFAULT_LEGACY_CONFIG_MAP,
        action
    )]
    legacy_config_map: String,

    /// What to do with the legacy ConfigMap after migration
    #[clap(
        value_enum,
        long = "legacy-policy",
        env = "LEGACY_POLICY",
        default_value_t = Policy::default()
    )]
    legacy_policy: Policy,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let store = common::connect().await?;
    run(config, store).await?;
    Ok(())
}

pub(crate) async fn run(config: Config, store: Arc<dyn RecordStore>) -> Result<MigrationOutcome> {
    let location = config.catalog.location();
    let legacy = config.legacy_config_map.trim();

    let outcome = Migrator::new(store, location.index_name(), config.retry.policy())
        .with_policy(config.legacy_policy.into())
        .migrate(legacy, location.namespace())
        .await?;

    match outcome {
        MigrationOutcome::Migrated { products } => {
            info!(legacy, catalog = %location, products, "migrated product catalog")
        }
        MigrationOutcome::AlreadyMigrated => {
            info!(legacy, catalog = %location, "product catalog already migrated")
        }
        MigrationOutcome::NoLegacyRecord => {
            info!(legacy, catalog = %location, "no legacy product catalog to migrate")
        }
    }
    Ok(outcome)
}
