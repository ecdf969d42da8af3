use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The condition an add-on agent maintains to report whether the add-on is healthy
pub const ADDON_CONDITION_AVAILABLE: &str = "Available";

/// ManagedClusterAddOn is the per-cluster instance of an add-on. It lives in the namespace
/// named after the ManagedCluster it belongs to.
/// API: addon.open-cluster-management.io/v1alpha1
#[derive(CustomResource, Serialize, Deserialize, Clone, Default, Debug, JsonSchema)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    namespaced,
    shortname = "mca"
)]
#[kube(status = "ManagedClusterAddOnStatus")]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnSpec {
    /// installNamespace is the namespace on the managed cluster to install the add-on agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, JsonSchema)]
pub struct ManagedClusterAddOnStatus {
    /// Conditions describe the state of the add-on as reported by its agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

impl ManagedClusterAddOn {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default()
    }

    /// Whether the add-on carries a deletion timestamp
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
