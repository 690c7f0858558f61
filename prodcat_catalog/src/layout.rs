//! How catalog content is laid out inside records.
//!
//! Every catalog record (the index, each product's detail record and the legacy monolithic record)
//! stores one YAML document per product, keyed by product name. The document maps each version of
//! the product to its data. In the index the data is an empty placeholder; in a detail record and
//! in the legacy record it is the full metadata of the version.

use std::collections::BTreeMap;

use crate::merge::merge;
use crate::store::RecordData;
use crate::value::{Mapping, Value};
use crate::{CatalogError, Result};

/// Product name to versions, decoded from the data of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductTable(BTreeMap<String, Mapping>);

impl ProductTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the data of `record`. Empty and `null` documents decode to a product without
    /// versions; anything other than a mapping is rejected.
    pub fn decode(record: &str, data: &RecordData) -> Result<Self> {
        let mut products = BTreeMap::new();
        for (product, document) in data {
            let malformed = |reason: String| CatalogError::MalformedRecord {
                record: record.to_string(),
                key: product.clone(),
                reason,
            };
            let versions = match Value::from_yaml_str(document).map_err(|e| malformed(e.to_string()))? {
                Value::Mapping(versions) => versions,
                Value::Null => Mapping::new(),
                other => {
                    return Err(malformed(format!(
                        "expected a mapping of versions, found {other:?}"
                    )));
                }
            };
            products.insert(product.clone(), versions);
        }
        Ok(Self(products))
    }

    pub fn encode(&self, record: &str) -> Result<RecordData> {
        self.0
            .iter()
            .map(|(product, versions)| {
                Value::Mapping(versions.clone())
                    .to_yaml_string()
                    .map(|document| (product.clone(), document))
                    .map_err(|e| CatalogError::MalformedRecord {
                        record: record.to_string(),
                        key: product.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn products(&self) -> impl Iterator<Item = (&str, &Mapping)> {
        self.0
            .iter()
            .map(|(product, versions)| (product.as_str(), versions))
    }

    pub fn versions(&self, product: &str) -> Option<&Mapping> {
        self.0.get(product)
    }

    pub fn versions_mut(&mut self, product: &str) -> Option<&mut Mapping> {
        self.0.get_mut(product)
    }

    /// The versions of `product`, adding the product if it is not present yet.
    pub fn product_entry(&mut self, product: &str) -> &mut Mapping {
        self.0.entry(product.to_string()).or_default()
    }

    pub fn version(&self, product: &str, version: &str) -> Option<&Value> {
        self.versions(product).and_then(|versions| versions.get(version))
    }

    pub fn version_mut(&mut self, product: &str, version: &str) -> Option<&mut Value> {
        self.versions_mut(product)
            .and_then(|versions| versions.get_mut(version))
    }

    pub fn insert_product(&mut self, product: impl Into<String>, versions: Mapping) {
        self.0.insert(product.into(), versions);
    }

    /// Record that `version` of `product` exists, keeping whatever data is already there.
    pub fn insert_placeholder(&mut self, product: &str, version: &str) {
        self.product_entry(product)
            .entry(version.to_string())
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    /// Remove one version. With `prune_product`, a product left without versions is dropped as
    /// well, otherwise it stays with an empty mapping. Returns whether the version was present.
    pub fn remove_version(&mut self, product: &str, version: &str, prune_product: bool) -> bool {
        let Some(versions) = self.0.get_mut(product) else {
            return false;
        };
        let removed = versions.remove(version).is_some();
        if prune_product && versions.is_empty() {
            self.0.remove(product);
        }
        removed
    }

    /// Fold `self` underneath `top`: for each product the versions of `top` are deep merged over
    /// those of `self`.
    pub fn merged_under(&self, top: &Self) -> Self {
        let mut merged = self.clone();
        for (product, versions) in &top.0 {
            let next = match merged.0.get(product) {
                Some(existing) => merge(existing, versions),
                None => versions.clone(),
            };
            merged.0.insert(product.clone(), next);
        }
        merged
    }

    /// The versions of `self` that `index` lists. Products left without versions are dropped.
    pub fn listed_in(&self, index: &Self) -> Self {
        let listed = self
            .0
            .iter()
            .filter_map(|(product, versions)| {
                let known = index.versions(product)?;
                let versions: Mapping = versions
                    .iter()
                    .filter(|(version, _)| known.contains_key(*version))
                    .map(|(version, data)| (version.clone(), data.clone()))
                    .collect();
                (!versions.is_empty()).then(|| (product.clone(), versions))
            })
            .collect();
        Self(listed)
    }
}
