use std::future::Future;

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::*;

use crate::resources::managedclusters::ManagedCluster;
use crate::Result;

use super::reconcilers::labels::LabelPatch;

pub const FIELD_MANAGER: &str = "addon-discovery-operator";

/// Applies label changes to a ManagedCluster. An implementation must apply the patch
/// atomically and only touch the keys named in it.
pub trait LabelPatcher: Send + Sync {
    fn patch_cluster_labels(
        &self,
        cluster: &str,
        patch: &LabelPatch,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Sends a JSON merge patch to the apiserver
#[derive(Clone)]
pub struct KubeLabelPatcher {
    clusters: Api<ManagedCluster>,
}

impl KubeLabelPatcher {
    pub fn new(client: Client) -> Self {
        Self {
            clusters: Api::all(client),
        }
    }
}

impl LabelPatcher for KubeLabelPatcher {
    async fn patch_cluster_labels(&self, cluster: &str, patch: &LabelPatch) -> Result<()> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };
        debug!("Patching labels of ManagedCluster {}", cluster);
        self.clusters
            .patch(cluster, &params, &Patch::Merge(patch.to_merge_patch()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use assert_json_diff::assert_json_eq;
    use http::{Request, Response};
    use kube::client::Body;
    use kube::core::ErrorResponse;
    use serde_json::json;

    use crate::resources::managedclusters::ManagedClusterSpec;
    use crate::Error;

    use super::*;

    fn patch() -> LabelPatch {
        LabelPatch {
            upserts: BTreeMap::from([(
                "feature.open-cluster-management.io/addon-addon1".to_string(),
                "available".to_string(),
            )]),
            removals: BTreeSet::from(["feature.open-cluster-management.io/addon-addon4".into()]),
        }
    }

    #[tokio::test]
    async fn test_sends_merge_patch_to_cluster() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let patcher = KubeLabelPatcher::new(Client::new(mock_service, "default"));

        let apiserver = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/cluster.open-cluster-management.io/v1/managedclusters/cluster1"
            );
            assert!(request
                .uri()
                .query()
                .unwrap_or_default()
                .contains("fieldManager=addon-discovery-operator"));
            assert_eq!(
                request.headers().get(http::header::CONTENT_TYPE).unwrap(),
                "application/merge-patch+json"
            );

            let body = request.into_body().collect_bytes().await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_json_eq!(
                body,
                json!({
                    "metadata": {
                        "labels": {
                            "feature.open-cluster-management.io/addon-addon1": "available",
                            "feature.open-cluster-management.io/addon-addon4": null,
                        }
                    }
                })
            );

            let cluster = ManagedCluster::new("cluster1", ManagedClusterSpec::default());
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&cluster).unwrap()))
                    .unwrap(),
            );
        });

        patcher
            .patch_cluster_labels("cluster1", &patch())
            .await
            .unwrap();
        apiserver.await.unwrap();
    }

    #[tokio::test]
    async fn test_conflict_is_surfaced() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let patcher = KubeLabelPatcher::new(Client::new(mock_service, "default"));

        let apiserver = tokio::spawn(async move {
            let (_request, send) = handle.next_request().await.expect("service not called");
            let status = ErrorResponse {
                status: "Failure".into(),
                message: "the object has been modified".into(),
                reason: "Conflict".into(),
                code: 409,
            };
            send.send_response(
                Response::builder()
                    .status(409)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        });

        let err = patcher
            .patch_cluster_labels("cluster1", &patch())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(kube::Error::Api(ref e)) if e.code == 409));
        apiserver.await.unwrap();
    }
}
