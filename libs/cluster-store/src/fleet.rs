use crate::crd::{ClusterRef, GcpFleetSource};
use crate::token::{TokenKey, TokenSource};
use crate::{Cluster, ConnectionConfig};

use rollop_k8s_util::error::{Error, Result};
use rollop_k8s_util::selector::selects;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::Deserialize;
use tracing::debug;

const GKE_HUB_URL: &str = "https://gkehub.googleapis.com/v1";
const CONNECT_GATEWAY_URL: &str = "https://connectgateway.googleapis.com/v1";

pub const MEMBERSHIP_KIND: &str = "Membership";

#[derive(Deserialize)]
struct ListMembershipsResponse {
    #[serde(default)]
    resources: Vec<Membership>,
}

#[derive(Deserialize)]
struct Membership {
    /// Full resource path: `projects/<p>/locations/<l>/memberships/<m>`.
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// GKE fleet adapter: target clusters are fleet memberships listed through
/// the GKE Hub API; connections go through the connect gateway.
pub(crate) struct FleetAdapter<'a> {
    pub http: &'a reqwest::Client,
    pub tokens: &'a TokenSource,
}

impl FleetAdapter<'_> {
    pub async fn list(
        &self,
        config: &GcpFleetSource,
        selector: &LabelSelector,
    ) -> Result<Vec<Cluster>> {
        let token = self.tokens.token(&TokenKey::default()).await?;
        let mut clusters = Vec::new();
        for project in &config.project_ids {
            let url = format!("{GKE_HUB_URL}/projects/{project}/locations/-/memberships");
            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| {
                    Error::ClusterStoreError(format!(
                        "failed to list fleet memberships for {project}: {e}"
                    ))
                })?;
            let memberships: ListMembershipsResponse = response.json().await.map_err(|e| {
                Error::ClusterStoreError(format!(
                    "invalid membership list response for {project}: {e}"
                ))
            })?;

            for membership in memberships.resources {
                if !selects(Some(selector), &membership.labels)? {
                    continue;
                }
                clusters.push(Cluster {
                    cluster_ref: ClusterRef {
                        kind: Some(MEMBERSHIP_KIND.to_string()),
                        name: membership.name,
                        namespace: None,
                    },
                    labels: membership.labels,
                });
            }
        }
        debug!(msg = "listed fleet memberships", count = clusters.len());
        Ok(clusters)
    }

    pub async fn connect(&self, cluster: &ClusterRef) -> Result<ConnectionConfig> {
        let host = gateway_host(&cluster.name)?;
        let token = self.tokens.token(&TokenKey::default()).await?;
        Ok(ConnectionConfig {
            host,
            // the connect gateway serves a publicly trusted certificate
            ca_data: None,
            token: Some(token),
            kubeconfig: None,
        })
    }
}

/// Connect gateway endpoint for a full membership resource path.
fn gateway_host(membership: &str) -> Result<String> {
    if !membership.contains("/memberships/") {
        return Err(Error::ClusterStoreError(format!(
            "membership ref {membership} is not a full resource path"
        )));
    }
    let gateway_path = membership.replace("/memberships/", "/gkeMemberships/");
    Ok(format!("{CONNECT_GATEWAY_URL}/{gateway_path}"))
}
