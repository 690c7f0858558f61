//! Read access to the catalog for tools that need to know what is installed.
//!
//! Queries read the index record and the detail records and fold them into one view; nothing here
//! writes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::active::ACTIVE_KEY;
use crate::layout::ProductTable;
use crate::naming;
use crate::store::{RecordStore, get_optional};
use crate::value::{Mapping, Value};
use crate::{CatalogError, CatalogLocation, Result};

/// Key of the component listing inside a version's data.
pub const COMPONENT_VERSIONS_KEY: &str = "component_versions";

const DOCKER_KEY: &str = "docker";
const HELM_KEY: &str = "helm";
const S3_KEY: &str = "s3";
const MANIFESTS_KEY: &str = "manifests";
const REPOSITORIES_KEY: &str = "repositories";
const CONFIGURATION_KEY: &str = "configuration";

/// Names of all records in the catalog's namespace carrying the catalog label.
pub async fn list_records(
    store: &dyn RecordStore,
    location: &CatalogLocation,
) -> Result<Vec<String>> {
    let selector = naming::catalog_selector(location.index_name());
    store
        .list(location.namespace(), &selector)
        .await
        .map_err(|e| CatalogError::store(location.index_name(), e))
}

/// All installed product versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductCatalog {
    products: Vec<InstalledProductVersion>,
}

impl ProductCatalog {
    /// Load the whole catalog.
    ///
    /// Reads every labelled record whose name starts with the index name, or only the index record
    /// when `shallow`. If no record carries the catalog label yet, the record named like the index
    /// is read instead, which covers a catalog still in the legacy layout.
    pub async fn load(
        store: &dyn RecordStore,
        location: &CatalogLocation,
        shallow: bool,
    ) -> Result<Self> {
        let index_name = location.index_name();
        let mut names = list_records(store, location).await?;
        if names.is_empty() {
            info!(
                catalog = %location,
                "no labelled catalog records found, falling back on the index record"
            );
            names.push(index_name.to_string());
        }
        names.retain(|name| name.starts_with(index_name) && (!shallow || name == index_name));
        Self::from_records(store, location, &names, shallow).await
    }

    /// Load the index record and the detail record of `product` only.
    pub async fn load_product(
        store: &dyn RecordStore,
        location: &CatalogLocation,
        product: &str,
    ) -> Result<Self> {
        let names = [
            location.index_name().to_string(),
            location.product_record_name(product)?,
        ];
        let mut catalog = Self::from_records(store, location, &names, false).await?;
        catalog.products.retain(|p| p.name == product);
        Ok(catalog)
    }

    /// Fold the records in `names` over the index record. Only versions the index lists are
    /// installed: a detail entry whose index write never landed is left out, and without an index
    /// record nothing is installed.
    async fn from_records(
        store: &dyn RecordStore,
        location: &CatalogLocation,
        names: &[String],
        shallow: bool,
    ) -> Result<Self> {
        let index_name = location.index_name();
        let Some(index) = Self::read_table(store, location, index_name).await? else {
            debug!(catalog = %location, "index record does not exist");
            return Ok(Self::default());
        };

        let mut merged = index.clone();
        for name in names.iter().filter(|name| name.as_str() != index_name) {
            if let Some(table) = Self::read_table(store, location, name).await? {
                merged = merged.merged_under(&table);
            }
        }
        let merged = merged.listed_in(&index);

        let mut products: Vec<_> = merged
            .products()
            .flat_map(|(product, versions)| {
                versions
                    .iter()
                    .map(move |(version, data)| InstalledProductVersion {
                        name: product.to_string(),
                        version: version.clone(),
                        data: data.as_mapping().cloned().unwrap_or_default(),
                        shallow,
                    })
            })
            .collect();
        products.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| compare_versions(&a.version, &b.version))
        });
        Ok(Self { products })
    }

    async fn read_table(
        store: &dyn RecordStore,
        location: &CatalogLocation,
        name: &str,
    ) -> Result<Option<ProductTable>> {
        let record = get_optional(store, name, location.namespace())
            .await
            .map_err(|e| CatalogError::store(name, e))?;
        match record {
            Some(record) => Ok(Some(ProductTable::decode(name, &record.body.data)?)),
            None => {
                debug!(record = name, "record does not exist");
                Ok(None)
            }
        }
    }

    pub fn products(&self) -> &[InstalledProductVersion] {
        &self.products
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Distinct product names, sorted.
    pub fn product_names(&self) -> Vec<&str> {
        self.products
            .iter()
            .map(|p| p.name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// All installed versions of `product`, oldest first.
    pub fn versions<'a, 'p>(
        &'a self,
        product: &'p str,
    ) -> impl Iterator<Item = &'a InstalledProductVersion> + use<'a, 'p> {
        self.products.iter().filter(move |p| p.name == product)
    }

    pub fn get(&self, product: &str, version: &str) -> Option<&InstalledProductVersion> {
        self.products
            .iter()
            .find(|p| p.name == product && p.version == version)
    }

    /// The highest installed version of `product`.
    pub fn latest(&self, product: &str) -> Option<&InstalledProductVersion> {
        self.versions(product)
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// The version of `product` marked active, if any.
    pub fn active(&self, product: &str) -> Option<&InstalledProductVersion> {
        self.versions(product).find(|p| p.is_active())
    }

    /// Look up `version` of `product`, or its latest version when `version` is `None`.
    pub fn get_product(
        &self,
        product: &str,
        version: Option<&str>,
    ) -> Result<&InstalledProductVersion> {
        let found = match version {
            Some(version) => self.get(product, version),
            None => {
                let latest = self.latest(product);
                if let Some(latest) = latest {
                    debug!(product, version = %latest.version, "using latest version");
                }
                latest
            }
        };
        found.ok_or_else(|| CatalogError::NotInstalled {
            product: product.to_string(),
            version: version.unwrap_or("any").to_string(),
        })
    }
}

/// One installed version of a product and its data.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledProductVersion {
    name: String,
    version: String,
    data: Mapping,
    shallow: bool,
}

impl InstalledProductVersion {
    pub fn new(name: impl Into<String>, version: impl Into<String>, data: Mapping) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            data,
            shallow: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn data(&self) -> &Mapping {
        &self.data
    }

    pub fn is_active(&self) -> bool {
        self.data.get(ACTIVE_KEY).and_then(Value::as_bool) == Some(true)
    }

    /// Whether this version records if it is active at all.
    pub fn supports_active(&self) -> bool {
        self.data.contains_key(ACTIVE_KEY)
    }

    /// Component listing by component type. Incomplete when the catalog was loaded shallow.
    pub fn component_versions(&self) -> Option<&Mapping> {
        if self.shallow {
            warn!(
                product = %self.name,
                version = %self.version,
                "component versions may be incomplete due to shallow loading"
            );
        }
        self.data.get(COMPONENT_VERSIONS_KEY).and_then(Value::as_mapping)
    }

    fn components(&self, kind: &str) -> &[Value] {
        self.component_versions()
            .and_then(|components| components.get(kind))
            .and_then(Value::as_sequence)
            .unwrap_or_default()
    }

    /// `(name, version)` of each Docker image.
    pub fn docker_images(&self) -> Vec<(&str, &str)> {
        pairs(self.components(DOCKER_KEY), "name", "version")
    }

    /// `(name, version)` of each Helm chart.
    pub fn helm_charts(&self) -> Vec<(&str, &str)> {
        pairs(self.components(HELM_KEY), "name", "version")
    }

    /// `(bucket, key)` of each S3 artifact.
    pub fn s3_artifacts(&self) -> Vec<(&str, &str)> {
        pairs(self.components(S3_KEY), "bucket", "key")
    }

    pub fn manifests(&self) -> Vec<&str> {
        self.components(MANIFESTS_KEY)
            .iter()
            .filter_map(Value::as_str)
            .collect()
    }

    pub fn repositories(&self) -> Vec<&Mapping> {
        self.components(REPOSITORIES_KEY)
            .iter()
            .filter_map(Value::as_mapping)
            .collect()
    }

    /// Names of the hosted repositories, listed directly or as members of a group repository.
    pub fn hosted_and_member_repo_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for repo in self.repositories() {
            match repo.get("type").and_then(Value::as_str) {
                Some("hosted") => names.extend(repo.get("name").and_then(Value::as_str)),
                Some("group") => names.extend(
                    repo.get("members")
                        .and_then(Value::as_sequence)
                        .unwrap_or_default()
                        .iter()
                        .filter_map(Value::as_str),
                ),
                _ => {}
            }
        }
        names
    }

    /// Configuration management repository of the product.
    pub fn configuration(&self) -> Option<&Mapping> {
        self.data.get(CONFIGURATION_KEY).and_then(Value::as_mapping)
    }

    pub fn clone_url(&self) -> Option<&str> {
        self.configuration_field("clone_url")
    }

    pub fn commit(&self) -> Option<&str> {
        self.configuration_field("commit")
    }

    pub fn import_branch(&self) -> Option<&str> {
        self.configuration_field("import_branch")
    }

    fn configuration_field(&self, key: &str) -> Option<&str> {
        self.configuration()?.get(key).and_then(Value::as_str)
    }

    /// Image resources provided by the product, as name to id.
    pub fn images(&self) -> BTreeMap<&str, Option<String>> {
        self.resources("images")
    }

    /// Recipe resources provided by the product, as name to id.
    pub fn recipes(&self) -> BTreeMap<&str, Option<String>> {
        self.resources("recipes")
    }

    fn resources(&self, kind: &str) -> BTreeMap<&str, Option<String>> {
        self.data
            .get(kind)
            .and_then(Value::as_mapping)
            .into_iter()
            .flatten()
            .map(|(name, resource)| {
                let id = resource.get("id").and_then(Value::scalar_to_string);
                (name.as_str(), id)
            })
            .collect()
    }
}

impl fmt::Display for InstalledProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

fn pairs<'a>(components: &'a [Value], first: &str, second: &str) -> Vec<(&'a str, &'a str)> {
    components
        .iter()
        .filter_map(|component| {
            let first = component.get(first)?.as_str()?;
            let second = component.get(second)?.as_str()?;
            Some((first, second))
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

impl PartialOrd for Segment<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
        }
    }
}

/// Split a version into runs of digits and runs of other characters, dropping separators.
fn segments(version: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = version;
    while let Some(c) = rest.chars().next() {
        if matches!(c, '.' | '-' | '_' | '+') {
            rest = &rest[c.len_utf8()..];
            continue;
        }
        let digits = c.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits || matches!(c, '.' | '-' | '_' | '+'))
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        segments.push(match run.parse() {
            Ok(n) if digits => Segment::Number(n),
            _ => Segment::Text(run),
        });
        rest = tail;
    }
    segments
}

/// Order two version strings.
///
/// Numeric parts compare as numbers, `2.10` is above `2.9`. A version with a trailing text part is
/// a pre-release of the version without it, so `1.0.0-rc1` is below `1.0.0`, while any further
/// numeric part makes a version higher, `1.0.1` is above `1.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = segments(a);
    let b = segments(b);
    for (x, y) in a.iter().zip(&b) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    let tail = |longer: &[Segment<'_>]| match longer.get(a.len().min(b.len())) {
        Some(Segment::Text(_)) => Ordering::Less,
        _ => Ordering::Greater,
    };
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => tail(&a),
        Ordering::Less => tail(&b).reverse(),
    }
}
