use crate::crd::{ClusterRef, KindClusterSource};
use crate::{Cluster, ConnectionConfig};

use rollop_k8s_util::error::{Error, Result};
use rollop_k8s_util::selector::selects;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams};
use kube::client::Client;
use tracing::debug;

pub const KIND_CLUSTER_KIND: &str = "KindCluster";
/// Label marking a kubeconfig secret as a registered kind cluster.
pub const KIND_SOURCE_LABEL: &str = "gitops.kpt.dev/cluster-source=kind";
const KUBECONFIG_KEY: &str = "kubeconfig";

/// Kind adapter: local clusters registered as kubeconfig secrets on the
/// control-plane cluster, used in development environments.
pub(crate) struct KindAdapter<'a> {
    pub client: &'a Client,
}

impl KindAdapter<'_> {
    pub async fn list(
        &self,
        config: &KindClusterSource,
        default_namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Cluster>> {
        let namespace = config.namespace.as_deref().unwrap_or(default_namespace);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secrets = api
            .list(&ListParams::default().labels(KIND_SOURCE_LABEL))
            .await
            .map_err(|e| {
                Error::ClusterStoreError(format!(
                    "failed to list kind cluster secrets in {namespace}: {e}"
                ))
            })?;

        let mut clusters = Vec::new();
        for secret in secrets {
            let labels = secret.metadata.labels.clone().unwrap_or_default();
            if !selects(Some(selector), &labels)? {
                continue;
            }
            // safe unwrap: listed objects always carry a name
            let name = secret.metadata.name.clone().unwrap();
            clusters.push(Cluster {
                cluster_ref: ClusterRef {
                    kind: Some(KIND_CLUSTER_KIND.to_string()),
                    name,
                    namespace: Some(namespace.to_string()),
                },
                labels,
            });
        }
        debug!(msg = "listed kind clusters", count = clusters.len(), namespace);
        Ok(clusters)
    }

    pub async fn connect(&self, cluster: &ClusterRef) -> Result<ConnectionConfig> {
        let namespace = cluster.namespace.as_deref().ok_or_else(|| {
            Error::ClusterStoreError(format!("kind cluster ref {} has no namespace", cluster.name))
        })?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(&cluster.name).await.map_err(|e| {
            Error::ClusterStoreError(format!(
                "failed to get kind cluster secret {namespace}/{}: {e}",
                cluster.name
            ))
        })?;
        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
            .ok_or_else(|| {
                Error::ClusterStoreError(format!(
                    "kind cluster secret {namespace}/{} has no {KUBECONFIG_KEY} key",
                    cluster.name
                ))
            })?;

        Ok(ConnectionConfig {
            host: String::new(),
            ca_data: None,
            token: None,
            kubeconfig: Some(kubeconfig),
        })
    }
}
