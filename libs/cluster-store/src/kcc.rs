use crate::crd::{ClusterRef, KccSource};
use crate::token::{TokenKey, TokenSource};
use crate::{Cluster, ConnectionConfig};

use rollop_k8s_util::error::{Error, Result};
use rollop_k8s_util::selector::selects;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::client::Client;
use tracing::debug;

pub const CONTAINER_CLUSTER_KIND: &str = "ContainerCluster";

fn container_cluster_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(
            "container.cnrm.cloud.google.com",
            "v1beta1",
            CONTAINER_CLUSTER_KIND,
        ),
        "containerclusters",
    )
}

/// Config Connector adapter: target clusters are the `ContainerCluster`
/// resources present on the control-plane cluster.
pub(crate) struct KccAdapter<'a> {
    pub client: &'a Client,
    pub tokens: &'a TokenSource,
}

impl KccAdapter<'_> {
    pub async fn list(
        &self,
        config: &KccSource,
        default_namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Cluster>> {
        let namespace = config.namespace.as_deref().unwrap_or(default_namespace);
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &container_cluster_resource(),
        );
        let container_clusters = api.list(&ListParams::default()).await.map_err(|e| {
            Error::ClusterStoreError(format!(
                "failed to list ContainerClusters in {namespace}: {e}"
            ))
        })?;

        let mut clusters = Vec::new();
        for cc in container_clusters {
            let labels = cc.metadata.labels.clone().unwrap_or_default();
            if !selects(Some(selector), &labels)? {
                continue;
            }
            // safe unwrap: listed objects always carry a name
            let name = cc.metadata.name.clone().unwrap();
            clusters.push(Cluster {
                cluster_ref: ClusterRef {
                    kind: Some(CONTAINER_CLUSTER_KIND.to_string()),
                    name,
                    namespace: Some(namespace.to_string()),
                },
                labels,
            });
        }
        debug!(msg = "listed KCC clusters", count = clusters.len(), namespace);
        Ok(clusters)
    }

    pub async fn connect(&self, cluster: &ClusterRef) -> Result<ConnectionConfig> {
        let namespace = cluster.namespace.as_deref().ok_or_else(|| {
            Error::ClusterStoreError(format!(
                "ContainerCluster ref {} has no namespace",
                cluster.name
            ))
        })?;
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &container_cluster_resource(),
        );
        let cc = api.get(&cluster.name).await.map_err(|e| {
            Error::ClusterStoreError(format!(
                "failed to get ContainerCluster {namespace}/{}: {e}",
                cluster.name
            ))
        })?;

        let endpoint = cc.data["status"]["endpoint"]
            .as_str()
            .ok_or_else(|| {
                Error::ClusterStoreError(format!(
                    "ContainerCluster {namespace}/{} has no endpoint yet",
                    cluster.name
                ))
            })?
            .to_string();
        let ca_data = cc.data["status"]["masterAuth"]["clusterCaCertificate"]
            .as_str()
            .or_else(|| cc.data["spec"]["masterAuth"]["clusterCaCertificate"].as_str())
            .map(str::to_string);
        let token = self.tokens.token(&TokenKey::default()).await?;

        Ok(ConnectionConfig {
            host: format!("https://{endpoint}"),
            ca_data,
            token: Some(token),
            kubeconfig: None,
        })
    }
}
