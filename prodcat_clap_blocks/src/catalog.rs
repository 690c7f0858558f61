//! Where the catalog lives.

use prodcat_catalog::{CatalogLocation, DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE};

/// CLI config for the catalog location.
#[derive(Debug, Clone, clap::Parser)]
pub struct CatalogConfig {
    /// Name of the index ConfigMap. Detail ConfigMaps are named after it.
    #[clap(
        long = "config-map",
        env = "CONFIG_MAP",
        default_value = DEFAULT_INDEX_NAME,
        action
    )]
    pub config_map: String,

    /// Namespace holding the catalog ConfigMaps.
    #[clap(
        long = "config-map-namespace",
        env = "CONFIG_MAP_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        action
    )]
    pub namespace: String,
}

impl CatalogConfig {
    pub fn location(&self) -> CatalogLocation {
        CatalogLocation::new(self.config_map.trim(), self.namespace.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn location() {
        let config = CatalogConfig::try_parse_from([
            "prodcat",
            "--config-map",
            "catalog ",
            "--config-map-namespace",
            "sysmgmt",
        ])
        .unwrap();
        assert_eq!(config.location(), CatalogLocation::new("catalog", "sysmgmt"));
    }
}
