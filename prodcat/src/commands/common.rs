use std::sync::Arc;

use prodcat_catalog::store::StoreError;
use prodcat_catalog::{Mapping, RecordStore, Value};
use prodcat_kube::KubeRecordStore;

/// Connect to the cluster the catalog lives in.
pub(crate) async fn connect() -> Result<Arc<dyn RecordStore>, StoreError> {
    Ok(Arc::new(KubeRecordStore::try_default().await?))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ContentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("content is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("content must be a mapping of keys to values")]
    NotAMapping,
}

/// Parse a YAML document that must hold a mapping. An empty document is an empty mapping.
pub(crate) fn parse_mapping(document: &str) -> Result<Mapping, ContentError> {
    match Value::from_yaml_str(document)? {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ContentError::NotAMapping),
    }
}

pub(crate) async fn read_mapping(path: &std::path::Path) -> Result<Mapping, ContentError> {
    let document = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ContentError::Read {
            path: path.display().to_string(),
            source,
        })?;
    parse_mapping(&document)
}
