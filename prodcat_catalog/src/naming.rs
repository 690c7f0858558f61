//! Record names and labels.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::{LabelSelector, Labels};
use crate::{CatalogError, Result};

/// Label carried by every catalog record. Its value is the name of the index record.
pub const CATALOG_LABEL_KEY: &str = "type";

/// Label set once a legacy record has been split into the index/detail layout.
pub const MIGRATED_LABEL_KEY: &str = "product-catalog.io/migrated";

pub const MIGRATED_LABEL_VALUE: &str = "true";

/// Maximum length of a DNS subdomain name.
const MAX_RECORD_NAME_LEN: usize = 253;

static RECORD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9]([a-z0-9.-]*[a-z0-9])?$").expect("record name pattern is valid")
});

static PRODUCT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z0-9._-]+$").expect("product name pattern is valid"));

/// Check a product name can be used as a key of a record's data.
pub fn validate_product_name(product: &str) -> Result<()> {
    if product.is_empty() {
        return Err(CatalogError::configuration("product name is required"));
    }
    if !PRODUCT_NAME.is_match(product) {
        return Err(CatalogError::configuration(format!(
            "invalid product name {product:?}: only alphanumerics, '-', '_' and '.' are allowed"
        )));
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(CatalogError::configuration("product version is required"));
    }
    Ok(())
}

/// Name of the detail record for `product`, derived from the index record name.
///
/// Product names may hold upper case characters and underscores, record names may not, so the
/// product is lower-cased and underscores become hyphens. The result must be a DNS subdomain.
pub fn product_record_name(index_name: &str, product: &str) -> Result<String> {
    validate_product_name(product)?;
    let name = format!("{index_name}-{}", product.replace('_', "-").to_lowercase());
    if name.len() > MAX_RECORD_NAME_LEN || !RECORD_NAME.is_match(&name) {
        return Err(CatalogError::configuration(format!(
            "product {product:?} maps to record name {name:?} which is not a valid DNS subdomain"
        )));
    }
    Ok(name)
}

/// Labels identifying a record as part of the catalog rooted at `index_name`.
pub fn catalog_labels(index_name: &str) -> Labels {
    Labels::from([(CATALOG_LABEL_KEY.to_string(), index_name.to_string())])
}

pub fn catalog_selector(index_name: &str) -> LabelSelector {
    LabelSelector::new(catalog_labels(index_name))
}

pub fn is_migrated(labels: &Labels) -> bool {
    labels.get(MIGRATED_LABEL_KEY).map(String::as_str) == Some(MIGRATED_LABEL_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_record_names() {
        assert_eq!(
            product_record_name("product-catalog", "sat").unwrap(),
            "product-catalog-sat"
        );
        assert_eq!(
            product_record_name("product-catalog", "HFP_firmware").unwrap(),
            "product-catalog-hfp-firmware"
        );
        assert_eq!(
            product_record_name("product-catalog", "cos.base").unwrap(),
            "product-catalog-cos.base"
        );
    }

    #[test]
    fn invalid_product_names() {
        for product in ["", "has space", "slash/y", "-trailing-hyphen-"] {
            assert!(
                matches!(
                    product_record_name("product-catalog", product),
                    Err(CatalogError::Configuration(_))
                ),
                "{product:?} should be rejected"
            );
        }
        let long = "a".repeat(250);
        assert!(product_record_name("product-catalog", &long).is_err());
    }

    #[test]
    fn versions_must_not_be_blank() {
        assert!(validate_version("1.0.0").is_ok());
        assert!(validate_version(" ").is_err());
    }

    #[test]
    fn migration_marker() {
        let mut labels = catalog_labels("product-catalog");
        assert!(!is_migrated(&labels));
        labels.insert(
            MIGRATED_LABEL_KEY.to_string(),
            MIGRATED_LABEL_VALUE.to_string(),
        );
        assert!(is_migrated(&labels));
        assert!(catalog_selector("product-catalog").matches(&labels));
    }
}
