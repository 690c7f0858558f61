//! [`RecordStore`] backed by Kubernetes ConfigMaps.
//!
//! A record is a ConfigMap: its `data` holds the record data, its labels the record labels and its
//! `resourceVersion` the version stamp. Conditional updates are `replace` calls carrying the
//! resource version read, which the API server rejects with `409 Conflict` when it is stale.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use prodcat_catalog::store::{
    LabelSelector, Record, RecordBody, RecordStore, ResourceVersion, StoreError,
};
use tracing::debug;

/// Field manager recorded on every write.
const FIELD_MANAGER: &str = "prodcat";

#[derive(Clone)]
pub struct KubeRecordStore {
    client: Client,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster configuration, or the local kubeconfig outside a cluster.
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default().await.map_err(StoreError::unavailable)?;
        Ok(Self::new(client))
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl fmt::Debug for KubeRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeRecordStore").finish_non_exhaustive()
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.to_string()),
    }
}

/// Translate an API error into the store's error vocabulary.
fn map_error(error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(response) if response.reason == "NotFound" || response.code == 404 => {
            StoreError::NotFound
        }
        kube::Error::Api(response) if response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict,
        error => StoreError::unavailable(error),
    }
}

fn to_config_map(
    name: &str,
    namespace: &str,
    body: RecordBody,
    version: Option<&ResourceVersion>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(body.labels),
            resource_version: version.map(|v| v.as_str().to_string()),
            ..Default::default()
        },
        data: Some(body.data),
        ..Default::default()
    }
}

fn into_record(config_map: ConfigMap) -> Result<Record, StoreError> {
    let ObjectMeta {
        name,
        labels,
        resource_version,
        ..
    } = config_map.metadata;
    let name = name.ok_or_else(|| StoreError::unavailable("ConfigMap without a name"))?;
    let version = resource_version.ok_or_else(|| {
        StoreError::unavailable(format!("ConfigMap {name} has no resource version"))
    })?;
    Ok(Record {
        name,
        body: RecordBody {
            data: config_map.data.unwrap_or_default(),
            labels: labels.unwrap_or_default(),
        },
        version: ResourceVersion::new(version),
    })
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Record, StoreError> {
        let config_map = self.api(namespace).get(name).await.map_err(map_error)?;
        into_record(config_map)
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
    ) -> Result<Record, StoreError> {
        debug!(name, namespace, "creating ConfigMap");
        let config_map = to_config_map(name, namespace, body, None);
        let created = self
            .api(namespace)
            .create(&post_params(), &config_map)
            .await
            .map_err(map_error)?;
        into_record(created)
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        body: RecordBody,
        version: &ResourceVersion,
    ) -> Result<Record, StoreError> {
        debug!(name, namespace, %version, "replacing ConfigMap");
        let config_map = to_config_map(name, namespace, body, Some(version));
        let replaced = self
            .api(namespace)
            .replace(name, &post_params(), &config_map)
            .await
            .map_err(map_error)?;
        into_record(replaced)
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), StoreError> {
        debug!(name, namespace, "deleting ConfigMap");
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<String>, StoreError> {
        let selector = selector.to_string();
        let config_maps = self
            .api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(map_error)?;
        let mut names: Vec<_> = config_maps
            .items
            .into_iter()
            .filter_map(|config_map| config_map.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use kube::core::ErrorResponse;
    use pretty_assertions::assert_eq;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from the API server"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn api_errors() {
        assert!(matches!(
            map_error(api_error(404, "NotFound")),
            StoreError::NotFound
        ));
        assert!(matches!(
            map_error(api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists
        ));
        assert!(matches!(
            map_error(api_error(409, "Conflict")),
            StoreError::Conflict
        ));
        assert!(matches!(
            map_error(api_error(403, "Forbidden")),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_error(api_error(500, "InternalError")),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn config_map_conversion() {
        let body = RecordBody {
            data: BTreeMap::from([("sat".to_string(), "'1.0': {}\n".to_string())]),
            labels: BTreeMap::from([("type".to_string(), "product-catalog".to_string())]),
        };
        let mut config_map = to_config_map(
            "product-catalog",
            "services",
            body.clone(),
            Some(&ResourceVersion::new("42")),
        );
        assert_eq!(
            config_map.metadata.resource_version.as_deref(),
            Some("42")
        );
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("services"));

        let record = into_record(config_map.clone()).unwrap();
        assert_eq!(record.name, "product-catalog");
        assert_eq!(record.version, ResourceVersion::new("42"));
        assert_eq!(record.body, body);

        config_map.metadata.resource_version = None;
        assert!(matches!(
            into_record(config_map),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn empty_config_map() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("product-catalog".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let record = into_record(config_map).unwrap();
        assert_eq!(record.body, RecordBody::default());
        assert!(to_config_map("a", "b", RecordBody::default(), None)
            .metadata
            .resource_version
            .is_none());
    }
}
