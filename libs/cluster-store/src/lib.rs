//! Target cluster discovery and connection configs.
//!
//! The store is polymorphic over cluster sources; each source kind has a
//! small adapter and the store dispatches on the tagged variant. Clusters
//! are returned in stable lexicographic order and never mutated.

pub mod crd;
pub mod token;

mod fleet;
mod kcc;
mod kind;

pub use crd::{ClusterRef, ClusterSourceSpec, ClusterSourceType};
pub use token::{ExternalAuthMode, TokenKey, TokenSource};

use rollop_k8s_util::error::{Error, Result};

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::client::Client;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use serde_json::json;

/// A discovered target cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub cluster_ref: ClusterRef,
    pub labels: BTreeMap<String, String>,
}

impl Cluster {
    #[inline]
    pub fn name(&self) -> &str {
        &self.cluster_ref.name
    }
}

/// Everything needed to open a client against a target cluster.
#[derive(Clone, Debug, Default)]
pub struct ConnectionConfig {
    pub host: String,
    /// Base64-encoded cluster CA bundle; absent when the endpoint serves a
    /// publicly trusted certificate.
    pub ca_data: Option<String>,
    pub token: Option<String>,
    /// Raw kubeconfig overriding host/CA/token, used by the kind adapter.
    pub kubeconfig: Option<String>,
}

impl ConnectionConfig {
    /// Build a kube client for the target cluster.
    pub async fn client(&self) -> Result<Client> {
        let kubeconfig = match &self.kubeconfig {
            Some(raw) => serde_yaml::from_str::<Kubeconfig>(raw).map_err(|e| {
                Error::ClusterStoreError(format!("invalid kubeconfig for target cluster: {e}"))
            })?,
            None => self.generated_kubeconfig()?,
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::ClusterStoreError(format!("failed to build target cluster config: {e}"))
            })?;
        Client::try_from(config).map_err(|e| {
            Error::KubeError(
                "failed to build target cluster client".to_string(),
                Box::new(e),
            )
        })
    }

    fn generated_kubeconfig(&self) -> Result<Kubeconfig> {
        let mut cluster = json!({ "server": self.host });
        if let Some(ca) = &self.ca_data {
            cluster["certificate-authority-data"] = json!(ca);
        }
        let mut user = json!({});
        if let Some(token) = &self.token {
            user["token"] = json!(token);
        }
        let kubeconfig = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": "target", "cluster": cluster }],
            "users": [{ "name": "target", "user": user }],
            "contexts": [{
                "name": "target",
                "context": { "cluster": "target", "user": "target" }
            }],
            "current-context": "target",
        });
        serde_json::from_value(kubeconfig)
            .map_err(|e| Error::SerializationError("failed to encode kubeconfig".to_string(), e))
    }
}

/// Discovers and caches target clusters from pluggable sources.
pub struct ClusterStore {
    client: Client,
    http: reqwest::Client,
    tokens: TokenSource,
}

impl ClusterStore {
    pub fn new(client: Client, tokens: TokenSource) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            tokens,
        }
    }

    /// List the clusters of `source` matching `selector`, in stable
    /// lexicographic order by name.
    pub async fn list(
        &self,
        source: &ClusterSourceSpec,
        default_namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Cluster>> {
        let mut clusters = match source.source_type {
            ClusterSourceType::Kcc => {
                let config = source.kcc.clone().unwrap_or_default();
                kcc::KccAdapter {
                    client: &self.client,
                    tokens: &self.tokens,
                }
                .list(&config, default_namespace, selector)
                .await?
            }
            ClusterSourceType::GcpFleet => {
                let config = source.gcp_fleet.as_ref().ok_or_else(|| {
                    Error::ConfigError(
                        "cluster source type GCPFleet requires a gcpFleet config".to_string(),
                    )
                })?;
                fleet::FleetAdapter {
                    http: &self.http,
                    tokens: &self.tokens,
                }
                .list(config, selector)
                .await?
            }
            ClusterSourceType::KindCluster => {
                let config = source.kind.clone().unwrap_or_default();
                kind::KindAdapter {
                    client: &self.client,
                }
                .list(&config, default_namespace, selector)
                .await?
            }
        };
        clusters.sort_by(|a, b| a.cluster_ref.name.cmp(&b.cluster_ref.name));
        Ok(clusters)
    }

    /// Resolve the connection config for one cluster; dispatches on the
    /// ref's kind so callers do not need the originating source spec.
    pub async fn connect(&self, cluster: &ClusterRef) -> Result<ConnectionConfig> {
        match cluster.kind.as_deref() {
            Some(kcc::CONTAINER_CLUSTER_KIND) => {
                kcc::KccAdapter {
                    client: &self.client,
                    tokens: &self.tokens,
                }
                .connect(cluster)
                .await
            }
            Some(fleet::MEMBERSHIP_KIND) => {
                fleet::FleetAdapter {
                    http: &self.http,
                    tokens: &self.tokens,
                }
                .connect(cluster)
                .await
            }
            Some(kind::KIND_CLUSTER_KIND) => {
                kind::KindAdapter {
                    client: &self.client,
                }
                .connect(cluster)
                .await
            }
            other => Err(Error::ConfigError(format!(
                "unsupported cluster kind {other:?} for {}",
                cluster.name
            ))),
        }
    }

    /// Open a client against the referenced target cluster.
    pub async fn target_client(&self, cluster: &ClusterRef) -> Result<Client> {
        self.connect(cluster).await?.client().await
    }
}
