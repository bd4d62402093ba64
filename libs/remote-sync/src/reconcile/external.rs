//! Projection of a RemoteSync into the external sync object applied on the
//! target cluster.

use crate::crd::{RemoteSync, SyncType};

use rollop_k8s_util::error::{Error, Result};
use rollop_operator::controller::watch::{REMOTE_SYNC_NAME_LABEL, REMOTE_SYNC_NAMESPACE_LABEL};

use std::collections::BTreeMap;

use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::json;

pub const CONFIG_SYNC_GROUP: &str = "configsync.gke.io";
pub const CONFIG_SYNC_VERSION: &str = "v1beta1";
/// RootSyncs are cluster-scoped in effect and live in the agent's own
/// namespace on the target cluster.
pub const ROOT_SYNC_NAMESPACE: &str = "config-management-system";

pub fn api_resource(sync_type: &SyncType) -> ApiResource {
    match sync_type {
        SyncType::RootSync => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(CONFIG_SYNC_GROUP, CONFIG_SYNC_VERSION, "RootSync"),
            "rootsyncs",
        ),
        SyncType::RepoSync => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(CONFIG_SYNC_GROUP, CONFIG_SYNC_VERSION, "RepoSync"),
            "reposyncs",
        ),
    }
}

/// Namespace the external object lives in on the target cluster.
pub fn external_namespace(remote_sync: &RemoteSync) -> String {
    match remote_sync.spec.sync_type {
        SyncType::RootSync => ROOT_SYNC_NAMESPACE.to_string(),
        // safe unwrap: RemoteSync is namespace scoped
        SyncType::RepoSync => remote_sync.namespace().unwrap(),
    }
}

/// Build the external sync object for server-side apply.
///
/// The object carries the RemoteSync back-labels so watch events on the
/// target cluster can be routed to their owner, plus any user-supplied
/// template metadata.
pub fn build_external_sync(remote_sync: &RemoteSync) -> Result<DynamicObject> {
    let name = remote_sync.name_any();
    // safe unwrap: RemoteSync is namespace scoped
    let namespace = remote_sync.namespace().unwrap();
    let template = &remote_sync.spec.template;

    let mut spec = json!({ "sourceFormat": template.source_format });
    match (&template.git, &template.oci) {
        (Some(git), _) => {
            spec["git"] = json!({
                "repo": git.repo,
                "revision": git.revision,
                "dir": git.dir,
                "branch": git.branch,
                "auth": git.auth,
            });
        }
        (None, Some(oci)) => {
            spec["oci"] = json!({
                "image": oci.image,
                "dir": oci.dir,
                "auth": oci.auth,
                "gcpServiceAccountEmail": oci.gcp_service_account_email,
            });
        }
        (None, None) => {
            return Err(Error::ConfigError(format!(
                "RemoteSync {namespace}/{name} template has neither git nor oci source"
            )));
        }
    }

    let mut labels: BTreeMap<String, String> = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    labels.insert(REMOTE_SYNC_NAME_LABEL.to_string(), name.clone());
    labels.insert(REMOTE_SYNC_NAMESPACE_LABEL.to_string(), namespace);

    let resource = api_resource(&remote_sync.spec.sync_type);
    let mut external = DynamicObject::new(&name, &resource)
        .within(&external_namespace(remote_sync))
        .data(json!({ "spec": spec }));
    external.metadata.labels = Some(labels);
    external.metadata.annotations = template.metadata.as_ref().and_then(|m| m.annotations.clone());
    Ok(external)
}
