use std::io::Write;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use prodcat_catalog::query::{ProductCatalog, list_records};
use prodcat_catalog::store::StoreError;
use prodcat_catalog::{CatalogError, Mapping, RecordStore, Value};
use prodcat_clap_blocks::catalog::CatalogConfig;

use super::common;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("unable to connect to the record store: {0}")]
    Connect(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("no version of {product} is marked active")]
    NoActiveVersion { product: String },

    #[error("failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum Format {
    #[default]
    Yaml,
    Json,
}

#[derive(Debug, Parser)]
#[clap(visible_alias = "q")]
pub(crate) struct Config {
    #[clap(flatten)]
    catalog: CatalogConfig,

    /// Product to show. Without it, every product and its versions are listed
    product: Option<String>,

    /// Version of the product to show, the latest one by default
    #[clap(long = "product-version", requires = "product", conflicts_with = "active")]
    version: Option<String>,

    /// Show the version of the product marked active
    #[clap(long = "active", requires = "product")]
    active: bool,

    /// Only read the index ConfigMap. Version data is left out
    #[clap(long = "shallow")]
    shallow: bool,

    /// List the names of the catalog ConfigMaps instead
    #[clap(long = "list-records", conflicts_with = "product")]
    list_records: bool,

    /// Output format
    #[clap(value_enum, long = "format", default_value_t = Format::default())]
    format: Format,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let store = common::connect().await?;
    let mut output = Vec::new();
    run(config, store, &mut output).await?;
    std::io::stdout().write_all(&output)?;
    Ok(())
}

pub(crate) async fn run(
    config: Config,
    store: Arc<dyn RecordStore>,
    out: &mut impl Write,
) -> Result<()> {
    let location = config.catalog.location();

    if config.list_records {
        for name in list_records(store.as_ref(), &location).await? {
            writeln!(out, "{name}")?;
        }
        return Ok(());
    }

    let Some(product) = config.product.as_deref() else {
        let catalog = ProductCatalog::load(store.as_ref(), &location, true).await?;
        let summary: Mapping = catalog
            .product_names()
            .into_iter()
            .map(|product| {
                let versions = catalog
                    .versions(product)
                    .map(|p| Value::from(p.version()))
                    .collect::<Vec<_>>();
                (product.to_string(), Value::Sequence(versions))
            })
            .collect();
        return render(&Value::Mapping(summary), config.format, out);
    };

    let catalog = if config.shallow {
        ProductCatalog::load(store.as_ref(), &location, true).await?
    } else {
        ProductCatalog::load_product(store.as_ref(), &location, product).await?
    };
    let found = if config.active {
        catalog.active(product).ok_or_else(|| Error::NoActiveVersion {
            product: product.to_string(),
        })?
    } else {
        catalog.get_product(product, config.version.as_deref())?
    };

    let versions = Mapping::from([(
        found.version().to_string(),
        Value::Mapping(found.data().clone()),
    )]);
    let document = Mapping::from([(found.name().to_string(), Value::Mapping(versions))]);
    render(&Value::Mapping(document), config.format, out)
}

fn render(value: &Value, format: Format, out: &mut impl Write) -> Result<()> {
    match format {
        Format::Yaml => write!(out, "{}", value.to_yaml_string()?)?,
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(value)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodcat_catalog::store::mem::MemRecordStore;
    use prodcat_catalog::{
        ActiveDirective, CatalogLocation, CatalogUpdater, RetryPolicy, UpdateRequest,
    };
    use pretty_assertions::assert_eq;

    async fn populated() -> Arc<dyn RecordStore> {
        let store: Arc<dyn RecordStore> = Arc::new(MemRecordStore::new());
        let updater = CatalogUpdater::new(
            Arc::clone(&store),
            CatalogLocation::default(),
            RetryPolicy::default(),
        );
        for (version, active) in [
            ("2.9.0", ActiveDirective::SetActive),
            ("2.10.0", ActiveDirective::None),
        ] {
            let data = Mapping::from([("chart".to_string(), Value::from(version))]);
            updater
                .apply(&UpdateRequest::write("sat", version, data).with_active(active))
                .await
                .unwrap();
        }
        store
    }

    async fn query(store: &Arc<dyn RecordStore>, args: &[&str]) -> Result<String> {
        let config =
            Config::try_parse_from(["query"].into_iter().chain(args.iter().copied())).unwrap();
        let mut out = Vec::new();
        run(config, Arc::clone(store), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn summary_and_records() {
        let store = populated().await;
        let summary = Value::from_yaml_str(&query(&store, &[]).await.unwrap()).unwrap();
        assert_eq!(
            summary,
            Value::Mapping(Mapping::from([(
                "sat".to_string(),
                Value::Sequence(vec![Value::from("2.9.0"), Value::from("2.10.0")])
            )]))
        );
        assert_eq!(
            query(&store, &["--list-records"]).await.unwrap(),
            "product-catalog\nproduct-catalog-sat\n"
        );
    }

    #[test_log::test(tokio::test)]
    async fn single_version() {
        let store = populated().await;

        let latest: serde_json::Value =
            serde_json::from_str(&query(&store, &["sat", "--format", "json"]).await.unwrap())
                .unwrap();
        assert_eq!(latest["sat"]["2.10.0"]["chart"], "2.10.0");

        let active: serde_json::Value = serde_json::from_str(
            &query(&store, &["sat", "--active", "--format", "json"])
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(active["sat"]["2.9.0"]["active"], true);

        let err = query(&store, &["sat", "--product-version", "3.0"])
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Catalog(CatalogError::NotInstalled { .. })),
            "{err}"
        );
    }

    #[test]
    fn flag_combinations() {
        assert!(Config::try_parse_from(["query", "--active"]).is_err());
        assert!(Config::try_parse_from(["query", "sat", "--list-records"]).is_err());
        assert!(
            Config::try_parse_from(["query", "sat", "--active", "--product-version", "1"])
                .is_err()
        );
    }
}
