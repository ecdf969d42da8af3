use std::fmt;

use kube::ResourceExt;

use crate::resources::managedclusteraddons::ManagedClusterAddOn;
use crate::resources::managedclusters::ManagedCluster;

/// Identifies a unit of work. A cluster key resyncs every add-on label on the cluster,
/// an add-on key only the label of that one add-on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReconcileKey {
    Cluster(String),
    AddOn { cluster: String, addon: String },
}

impl ReconcileKey {
    pub fn for_cluster(cluster: &ManagedCluster) -> Self {
        ReconcileKey::Cluster(cluster.name_any())
    }

    /// Add-ons live in the namespace named after their cluster; one without a namespace
    /// cannot be attributed to a cluster.
    pub fn for_addon(addon: &ManagedClusterAddOn) -> Option<Self> {
        Some(ReconcileKey::AddOn {
            cluster: addon.namespace()?,
            addon: addon.name_any(),
        })
    }

    pub fn cluster(&self) -> &str {
        match self {
            ReconcileKey::Cluster(cluster) => cluster,
            ReconcileKey::AddOn { cluster, .. } => cluster,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileKey::Cluster(_) => "cluster",
            ReconcileKey::AddOn { .. } => "addon",
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileKey::Cluster(cluster) => write!(f, "{cluster}"),
            ReconcileKey::AddOn { cluster, addon } => write!(f, "{cluster}/{addon}"),
        }
    }
}
