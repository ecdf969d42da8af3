use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;

use crate::resources::managedclusteraddons::ManagedClusterAddOn;
use crate::resources::managedclusters::ManagedCluster;
use crate::{Error, Result};

/// Read-only snapshot access to the watched objects. Lookups never fail; a missing object
/// is simply `None`.
pub trait AddOnCache: Send + Sync {
    fn get_cluster(&self, name: &str) -> Option<Arc<ManagedCluster>>;

    fn get_addon(&self, cluster: &str, addon: &str) -> Option<Arc<ManagedClusterAddOn>>;

    fn list_addons(&self, cluster: &str) -> Vec<Arc<ManagedClusterAddOn>>;
}

/// AddOnCache backed by reflector stores
#[derive(Clone)]
pub struct StoreCache {
    clusters: Store<ManagedCluster>,
    addons: Store<ManagedClusterAddOn>,
}

impl StoreCache {
    pub fn new(clusters: Store<ManagedCluster>, addons: Store<ManagedClusterAddOn>) -> Self {
        Self { clusters, addons }
    }

    /// Wait until both stores have seen their initial list. A full resync against a
    /// partially filled add-on store would remove labels of add-ons not listed yet.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.clusters
            .wait_until_ready()
            .await
            .map_err(|_| Error::CacheNotReady("ManagedCluster"))?;
        self.addons
            .wait_until_ready()
            .await
            .map_err(|_| Error::CacheNotReady("ManagedClusterAddOn"))
    }
}

impl AddOnCache for StoreCache {
    fn get_cluster(&self, name: &str) -> Option<Arc<ManagedCluster>> {
        self.clusters.get(&ObjectRef::new(name))
    }

    fn get_addon(&self, cluster: &str, addon: &str) -> Option<Arc<ManagedClusterAddOn>> {
        self.addons.get(&ObjectRef::new(addon).within(cluster))
    }

    fn list_addons(&self, cluster: &str) -> Vec<Arc<ManagedClusterAddOn>> {
        self.addons
            .state()
            .into_iter()
            .filter(|addon| addon.namespace().as_deref() == Some(cluster))
            .collect()
    }
}
