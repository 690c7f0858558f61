//! The `active` marker: which version of a product is currently in service.
//!
//! At most one version of a product may carry `active: true`. The marker is opt-in; it is only
//! touched when an update explicitly asks for it.

use tracing::debug;

use crate::value::{Mapping, Value};
use crate::{CatalogError, Result};

/// Key holding the marker inside a version's mapping.
pub const ACTIVE_KEY: &str = "active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveDirective {
    /// Leave every `active` field as it is.
    #[default]
    None,
    /// Mark the updated version active and every other existing version inactive.
    SetActive,
    /// Strip the `active` field from every version.
    RemoveActive,
}

impl ActiveDirective {
    /// Build the directive from the two independent switches an installer can set. Asking for
    /// both is rejected before the catalog is touched.
    pub fn from_flags(set_active: bool, remove_active: bool) -> Result<Self> {
        match (set_active, remove_active) {
            (true, true) => Err(CatalogError::configuration(
                "setting the active version and removing the active field are mutually exclusive",
            )),
            (true, false) => Ok(Self::SetActive),
            (false, true) => Ok(Self::RemoveActive),
            (false, false) => Ok(Self::None),
        }
    }

    /// Apply the directive to all versions of one product. `version` is the version the update
    /// request is about.
    pub fn enforce(self, versions: &mut Mapping, version: &str) {
        match self {
            Self::None => {}
            Self::SetActive => {
                debug!(version, "marking version active");
                for (name, data) in versions.iter_mut() {
                    if let Some(data) = data.as_mapping_mut() {
                        data.insert(ACTIVE_KEY.to_string(), Value::Bool(name == version));
                    }
                }
            }
            Self::RemoveActive => {
                debug!("removing active field from all versions");
                for data in versions.values_mut() {
                    if let Some(data) = data.as_mapping_mut() {
                        data.remove(ACTIVE_KEY);
                    }
                }
            }
        }
    }
}

/// The version explicitly marked active, if any.
pub fn active_version(versions: &Mapping) -> Option<&str> {
    versions
        .iter()
        .find(|(_, data)| data.get(ACTIVE_KEY).and_then(Value::as_bool) == Some(true))
        .map(|(name, _)| name.as_str())
}
