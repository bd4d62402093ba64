//! Cluster source fragments embedded in the Rollout custom resource.

use std::fmt;

#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where the rollout's target clusters are discovered from.
///
/// A discriminated union in the Kubernetes style: `sourceType` names the
/// variant and the matching optional field carries its configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClusterSourceSpec {
    pub source_type: ClusterSourceType,

    /// Config Connector `ContainerCluster` resources on the control-plane cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kcc: Option<KccSource>,

    /// GKE fleet memberships resolved through the GKE Hub API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcp_fleet: Option<GcpFleetSource>,

    /// Local kind clusters registered as kubeconfig secrets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<KindClusterSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum ClusterSourceType {
    #[default]
    #[serde(rename = "KCC")]
    Kcc,
    #[serde(rename = "GCPFleet")]
    GcpFleet,
    #[serde(rename = "KindCluster")]
    KindCluster,
}

impl fmt::Display for ClusterSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterSourceType::Kcc => write!(f, "KCC"),
            ClusterSourceType::GcpFleet => write!(f, "GCPFleet"),
            ClusterSourceType::KindCluster => write!(f, "KindCluster"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct KccSource {
    /// Namespace holding the `ContainerCluster` resources. Defaults to the
    /// rollout's own namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct GcpFleetSource {
    /// Projects whose fleet memberships are targeted.
    pub project_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct KindClusterSource {
    /// Namespace holding the kubeconfig secrets. Defaults to the rollout's
    /// own namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to a discovered target cluster.
///
/// `kind` selects the cluster-store adapter used to connect; `name` may carry
/// a slash-separated path (fleet membership refs do) of which only the final
/// segment participates in downstream object names.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
