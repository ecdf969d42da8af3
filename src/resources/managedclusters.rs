use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ManagedCluster represents a cluster registered with the hub.
/// API: cluster.open-cluster-management.io/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Default, Debug, JsonSchema)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    shortname = "mcl"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// hubAcceptsClient represents that the hub accepts the joining of the agent on the managed cluster.
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// leaseDurationSeconds is used to coordinate the lease update time of the agent on the managed cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

impl ManagedCluster {
    /// Whether the cluster carries a deletion timestamp and is being torn down
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
