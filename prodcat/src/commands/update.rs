use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::builder::BoolishValueParser;
use prodcat_catalog::store::StoreError;
use prodcat_catalog::{
    ActiveDirective, CatalogError, CatalogUpdater, RecordStore, UpdateMode, UpdateOutcome,
    UpdateRequest,
};
use prodcat_clap_blocks::catalog::CatalogConfig;
use prodcat_clap_blocks::retry::UpdateRetryConfig;
use tracing::info;

use super::common::{self, ContentError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("unable to connect to the record store: {0}")]
    Connect(#[from] StoreError),

    #[error("one of YAML_CONTENT_FILE or YAML_CONTENT_STRING must be specified")]
    NoContent,

    #[error(transparent)]
    Content(#[from] ContentError),

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

    /// Version of the product
    #[clap(long = "product-version", env = "PRODUCT_VERSION")]
    version: String,

    /// File holding the YAML data of the version
    #[clap(long = "yaml-content-file", env = "YAML_CONTENT_FILE")]
    yaml_content_file: Option<PathBuf>,

    /// Older name of `--yaml-content-file`
    #[clap(long = "yaml-content", env = "YAML_CONTENT", hide = true)]
    yaml_content: Option<PathBuf>,

    /// YAML data of the version, used when no content file is given
    #[clap(long = "yaml-content-string", env = "YAML_CONTENT_STRING")]
    yaml_content_string: Option<String>,

    /// Mark this version active and every other version of the product inactive
    #[clap(
        long = "set-active-version",
        env = "SET_ACTIVE_VERSION",
        action = clap::ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
    )]
    set_active_version: bool,

    /// Remove the active field from every version of the product
    #[clap(
        long = "remove-active-field",
        env = "REMOVE_ACTIVE_FIELD",
        action = clap::ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
    )]
    remove_active_field: bool,

    /// Replace the existing data of the version instead of merging into it
    #[clap(
        long = "update-overwrite",
        env = "UPDATE_OVERWRITE",
        action = clap::ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
    )]
    update_overwrite: bool,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    // reject bad flag combinations before connecting
    ActiveDirective::from_flags(config.set_active_version, config.remove_active_field)?;
    let store = common::connect().await?;
    run(config, store).await?;
    Ok(())
}

pub(crate) async fn run(config: Config, store: Arc<dyn RecordStore>) -> Result<UpdateOutcome> {
    let active = ActiveDirective::from_flags(config.set_active_version, config.remove_active_field)?;
    let mode = if config.update_overwrite {
        UpdateMode::Overwrite
    } else {
        UpdateMode::Merge
    };

    let file = config
        .yaml_content_file
        .as_ref()
        .or(config.yaml_content.as_ref())
        .filter(|path| !path.as_os_str().is_empty());
    let data = match (file, config.yaml_content_string.as_deref()) {
        (Some(path), _) => common::read_mapping(path).await?,
        (None, Some(document)) if !document.trim().is_empty() => common::parse_mapping(document)?,
        _ => return Err(Error::NoContent),
    };

    let request = UpdateRequest::write(&config.product, &config.version, data)
        .with_mode(mode)
        .with_active(active);
    let updater = CatalogUpdater::new(store, config.catalog.location(), config.retry.policy());
    let outcome = updater.apply(&request).await?;
    info!(
        product = request.product(),
        version = request.version(),
        catalog = %updater.location(),
        changed = outcome.changed(),
        "updated product catalog"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use prodcat_catalog::query::ProductCatalog;
    use prodcat_catalog::store::mem::MemRecordStore;
    use prodcat_catalog::{CatalogLocation, Value};
    use pretty_assertions::assert_eq;

    fn config(args: &[&str]) -> Config {
        Config::try_parse_from(
            ["update", "--retry-backoff", "0s"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    async fn data(store: &MemRecordStore, product: &str, version: &str) -> Option<Value> {
        let catalog = ProductCatalog::load(store, &CatalogLocation::default(), false)
            .await
            .unwrap();
        catalog
            .get(product, version)
            .map(|p| Value::Mapping(p.data().clone()))
    }

    #[test_log::test(tokio::test)]
    async fn from_string_then_file() {
        let store = Arc::new(MemRecordStore::new());
        run(
            config(&[
                "--product",
                "sat",
                "--product-version",
                "2.4.0",
                "--yaml-content-string",
                "component_versions: {helm: [{name: sat, version: 1.0.0}]}",
                "--set-active-version",
            ]),
            Arc::clone(&store) as _,
        )
        .await
        .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "configuration: {{commit: abc}}").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let outcome = run(
            config(&[
                "--product",
                "sat",
                "--product-version",
                "2.4.0",
                "--yaml-content-file",
                &path,
            ]),
            Arc::clone(&store) as _,
        )
        .await
        .unwrap();
        assert!(outcome.detail_written);
        assert!(!outcome.index_written);

        let data = data(&store, "sat", "2.4.0").await.unwrap();
        assert_eq!(data.get("active"), Some(&Value::Bool(true)));
        assert!(data.get("component_versions").is_some());
        assert_eq!(
            data.get("configuration").and_then(|c| c.get("commit")),
            Some(&Value::from("abc"))
        );
    }

    #[test_log::test(tokio::test)]
    async fn overwrite() {
        let store = Arc::new(MemRecordStore::new());
        for (content, extra) in [("a: 1", None), ("b: 2", Some("--update-overwrite"))] {
            let mut args = vec![
                "--product",
                "cos",
                "--product-version",
                "1.0",
                "--yaml-content-string",
                content,
            ];
            args.extend(extra);
            run(config(&args), Arc::clone(&store) as _).await.unwrap();
        }
        let data = data(&store, "cos", "1.0").await.unwrap();
        assert_eq!(data.get("a"), None);
        assert_eq!(data.get("b"), Some(&Value::Integer(2)));
    }

    #[test_log::test(tokio::test)]
    async fn rejected_requests() {
        let store = Arc::new(MemRecordStore::new());
        let err = run(
            config(&["--product", "sat", "--product-version", "1.0"]),
            Arc::clone(&store) as _,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoContent), "{err}");

        let err = run(
            config(&[
                "--product",
                "sat",
                "--product-version",
                "1.0",
                "--yaml-content-string",
                "{}",
                "--set-active-version",
                "--remove-active-field",
            ]),
            Arc::clone(&store) as _,
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, Error::Catalog(CatalogError::Configuration(_))),
            "{err}"
        );

        let err = run(
            config(&[
                "--product",
                "sat",
                "--product-version",
                "1.0",
                "--yaml-content-string",
                "just a string",
            ]),
            Arc::clone(&store) as _,
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, Error::Content(ContentError::NotAMapping)),
            "{err}"
        );
        assert_eq!(store.write_count(), 0);
    }
}
