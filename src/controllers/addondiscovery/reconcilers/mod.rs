use std::collections::BTreeMap;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::resources::managedclusteraddons::ManagedClusterAddOn;
use crate::{Error, Result};

use super::cache::AddOnCache;
use super::key::ReconcileKey;
use super::patcher::LabelPatcher;

pub mod labels;
pub mod status;

use labels::{AddOnLabels, LabelPatch};
use status::classify;

/// Keeps the add-on feature labels of ManagedClusters in line with their add-ons
pub struct Reconciler<C, P> {
    cache: C,
    patcher: P,
    labels: AddOnLabels,
}

impl<C, P> Reconciler<C, P>
where
    C: AddOnCache,
    P: LabelPatcher,
{
    pub fn new(cache: C, patcher: P, labels: AddOnLabels) -> Self {
        Self {
            cache,
            patcher,
            labels,
        }
    }

    /// Reconcile the work identified by `key`, returning the patch that was applied, if any
    pub async fn reconcile(
        &self,
        key: &ReconcileKey,
        cancel: &CancellationToken,
    ) -> Result<Option<LabelPatch>> {
        match key {
            ReconcileKey::Cluster(cluster) => self.reconcile_cluster(cluster, cancel).await,
            ReconcileKey::AddOn { cluster, addon } => {
                self.reconcile_addon(cluster, addon, cancel).await
            }
        }
    }

    /// Full resync: every reserved label on the cluster is recomputed from the cached add-ons
    pub async fn reconcile_cluster(
        &self,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<LabelPatch>> {
        let patch = self.cluster_patch(cluster);
        self.apply(cluster, patch, cancel).await
    }

    /// Targeted resync: only the label of one add-on is recomputed
    pub async fn reconcile_addon(
        &self,
        cluster: &str,
        addon: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<LabelPatch>> {
        let patch = self.addon_patch(cluster, addon);
        self.apply(cluster, patch, cancel).await
    }

    fn cluster_patch(&self, name: &str) -> Option<LabelPatch> {
        let Some(cluster) = self.cache.get_cluster(name) else {
            debug!("ManagedCluster {} not found, skipping", name);
            return None;
        };
        if cluster.is_terminating() {
            debug!("ManagedCluster {} is terminating, skipping", name);
            return None;
        }

        let addons = self.cache.list_addons(name);
        let desired = self.desired_labels(addons.iter().map(|addon| &**addon));
        self.labels.diff(cluster.labels(), &desired)
    }

    fn addon_patch(&self, cluster_name: &str, addon_name: &str) -> Option<LabelPatch> {
        let Some(cluster) = self.cache.get_cluster(cluster_name) else {
            debug!("ManagedCluster {} not found, skipping", cluster_name);
            return None;
        };
        if cluster.is_terminating() {
            debug!("ManagedCluster {} is terminating, skipping", cluster_name);
            return None;
        }
        if !self.labels.has_valid_key(addon_name) {
            warn!(
                "ManagedClusterAddOn {}/{} has a name too long for a label key, skipping",
                cluster_name, addon_name
            );
            return None;
        }

        let desired = self
            .cache
            .get_addon(cluster_name, addon_name)
            .filter(|addon| !addon.is_terminating())
            .map(|addon| classify(&addon));
        self.labels
            .diff_one(cluster.labels(), addon_name, desired)
    }

    /// The reserved labels a cluster should carry given its add-ons. Terminating add-ons
    /// and add-ons whose name cannot form a label key contribute nothing.
    pub fn desired_labels<'a>(
        &self,
        addons: impl IntoIterator<Item = &'a ManagedClusterAddOn>,
    ) -> BTreeMap<String, String> {
        addons
            .into_iter()
            .filter(|addon| !addon.is_terminating())
            .filter_map(|addon| {
                let name = addon.name_any();
                if !self.labels.has_valid_key(&name) {
                    warn!(
                        "ManagedClusterAddOn {}/{} has a name too long for a label key, skipping",
                        addon.namespace().unwrap_or_default(),
                        name
                    );
                    return None;
                }
                Some((self.labels.key(&name), classify(addon).to_string()))
            })
            .collect()
    }

    async fn apply(
        &self,
        cluster: &str,
        patch: Option<LabelPatch>,
        cancel: &CancellationToken,
    ) -> Result<Option<LabelPatch>> {
        let Some(patch) = patch else {
            return Ok(None);
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            upserts = ?patch.upserts,
            removals = ?patch.removals,
            "Updating add-on labels of ManagedCluster {}",
            cluster
        );
        self.patcher.patch_cluster_labels(cluster, &patch).await?;
        Ok(Some(patch))
    }
}
