use rollop_cluster_store::ClusterRef;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A RemoteSync is the control-plane side of one sync object on one target
/// cluster. It is owned by a Rollout and carries everything needed to apply
/// and track the external RootSync or RepoSync.
///
/// More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "rollop",
    group = "gitops.kpt.dev",
    version = "v1alpha1",
    kind = "RemoteSync",
    plural = "remotesyncs",
    singular = "remotesync",
    shortname = "rsync",
    namespaced,
    status = "RemoteSyncStatus",
    doc = r#"RemoteSync mirrors a RootSync or RepoSync object onto a target cluster."#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"SyncStatus","type":"string","jsonPath":".status.syncStatus"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncSpec {
    /// Target cluster the external sync object is applied to.
    pub cluster_ref: ClusterRef,

    /// External sync kind projected onto the target cluster.
    #[serde(rename = "type", default)]
    pub sync_type: SyncType,

    /// Declarative template for the external sync object.
    pub template: SyncTemplateSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum SyncType {
    #[default]
    RootSync,
    RepoSync,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncType::RootSync => write!(f, "RootSync"),
            SyncType::RepoSync => write!(f, "RepoSync"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncTemplateSpec {
    /// Source format passed through to the external sync object.
    #[serde(default = "default_source_format")]
    pub source_format: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSyncSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oci: Option<OciSyncSpec>,

    /// Extra metadata merged into the external sync object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SyncMetadataSpec>,
}

fn default_source_format() -> String {
    "unstructured".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct GitSyncSpec {
    pub repo: String,

    #[serde(default)]
    pub revision: String,

    #[serde(default)]
    pub branch: String,

    #[serde(default)]
    pub dir: String,

    #[serde(default = "default_git_auth")]
    pub auth: String,
}

fn default_git_auth() -> String {
    "none".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OciSyncSpec {
    pub image: String,

    #[serde(default)]
    pub dir: String,

    #[serde(default)]
    pub auth: String,

    #[serde(default)]
    pub gcp_service_account_email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadataSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Most recent observed status of the RemoteSync. Read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,

    /// Normalized status of the external sync object:
    /// "Synced", "Pending", "Error", "Stalled" or "Unknown".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,

    /// Whether the external sync object has been created on the target.
    #[serde(default)]
    pub sync_created: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl RemoteSync {
    /// The template revision the external object is expected to reach.
    /// OCI templates carry no requested revision; the synced digest is
    /// whatever the agent resolved.
    pub fn requested_revision(&self) -> &str {
        if let Some(git) = &self.spec.template.git {
            if !git.revision.is_empty() {
                return &git.revision;
            }
            return &git.branch;
        }
        ""
    }

    /// Whether the live external status counts as synced for scheduling.
    pub fn is_synced(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.sync_status.as_deref())
            .is_some_and(|s| s == crate::reconcile::status::SYNC_STATUS_SYNCED)
    }
}
