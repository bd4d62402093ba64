//! Target computation: the desired RemoteSync set and its diff against the
//! live set.

use crate::crd::{ROLLOUT_NAME_LABEL, Rollout};
use crate::scheduler::WaveView;

use rollop_cluster_store::Cluster;
use rollop_k8s_util::types::{last_segment, sanitize_name};
use rollop_package_discovery::DiscoveredPackage;
use rollop_remote_sync::crd::{
    GitSyncSpec, OciSyncSpec, RemoteSync, RemoteSyncSpec, SyncTemplateSpec,
};

use std::collections::{BTreeMap, HashMap};

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Derived name of the sync object carrying `package` to `cluster_name`.
///
/// Pure function of the package identity and the cluster name; a rollout
/// materializes at most one package per cluster, so the slot is fixed at 0
/// (reserved for multi-package expansion). Only the final path segment of
/// the cluster name participates.
pub fn remote_sync_name(package: &DiscoveredPackage, cluster_name: &str) -> String {
    let parts = [
        package.source_kind(),
        "0",
        package.directory(),
        last_segment(cluster_name),
    ];
    sanitize_name(
        &parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("-"),
    )
}

/// Classified per-(cluster, package) targets of one reconciliation.
#[derive(Debug, Default)]
pub struct Targets {
    pub to_create: Vec<RemoteSync>,
    pub to_update: Vec<RemoteSync>,
    /// Live objects whose spec already matches the desired spec.
    pub unchanged: Vec<RemoteSync>,
    /// Live objects with no counterpart in the desired set.
    pub to_delete: Vec<RemoteSync>,
}

/// Per-wave slice of the classified targets.
#[derive(Debug, Default)]
pub struct WaveTargets {
    pub to_create: Vec<RemoteSync>,
    pub to_update: Vec<RemoteSync>,
    pub unchanged: Vec<RemoteSync>,
    pub to_delete: Vec<RemoteSync>,
}

/// Compute the desired RemoteSync set from the matched pairs and classify
/// it against the live set. The first package per cluster wins.
pub fn compute(
    rollout: &Rollout,
    pairs: &[(Cluster, Vec<DiscoveredPackage>)],
    existing: &[RemoteSync],
) -> Targets {
    let existing_by_name: HashMap<String, &RemoteSync> = existing
        .iter()
        .map(|rs| (rs.name_any(), rs))
        .collect();

    let mut targets = Targets::default();
    let mut desired_names = Vec::new();
    for (cluster, packages) in pairs {
        let Some(package) = packages.first() else {
            continue;
        };
        let desired = desired_remote_sync(rollout, cluster, package);
        let name = desired.name_any();
        desired_names.push(name.clone());
        match existing_by_name.get(&name) {
            None => targets.to_create.push(desired),
            Some(live) if live.spec != desired.spec => targets.to_update.push(desired),
            Some(live) => targets.unchanged.push((*live).clone()),
        }
    }

    targets.to_delete = existing
        .iter()
        .filter(|rs| !desired_names.contains(&rs.name_any()))
        .cloned()
        .collect();

    sort_by_cluster(&mut targets.to_create);
    sort_by_cluster(&mut targets.to_update);
    sort_by_cluster(&mut targets.unchanged);
    sort_by_cluster(&mut targets.to_delete);
    targets
}

fn sort_by_cluster(list: &mut [RemoteSync]) {
    list.sort_by(|a, b| a.spec.cluster_ref.name.cmp(&b.spec.cluster_ref.name));
}

/// The desired sync object for one (cluster, package) pair. Carries the
/// rollout back-label and an owner reference for cascade tracking.
pub fn desired_remote_sync(
    rollout: &Rollout,
    cluster: &Cluster,
    package: &DiscoveredPackage,
) -> RemoteSync {
    let name = remote_sync_name(package, cluster.name());
    let mut labels = BTreeMap::new();
    labels.insert(ROLLOUT_NAME_LABEL.to_string(), rollout.name_any());

    let template = match package {
        DiscoveredPackage::Git(git) => SyncTemplateSpec {
            source_format: "unstructured".to_string(),
            git: Some(GitSyncSpec {
                repo: git.http_url.clone(),
                revision: git.revision.clone(),
                branch: git.branch.clone(),
                dir: git.directory.clone(),
                auth: "none".to_string(),
            }),
            oci: None,
            metadata: rollout.spec.sync_template.metadata.clone(),
        },
        DiscoveredPackage::Oci(oci) => SyncTemplateSpec {
            source_format: "unstructured".to_string(),
            git: None,
            oci: Some(OciSyncSpec {
                image: oci.image.clone(),
                dir: oci.directory.clone(),
                auth: String::new(),
                gcp_service_account_email: String::new(),
            }),
            metadata: rollout.spec.sync_template.metadata.clone(),
        },
    };

    RemoteSync {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: rollout.namespace(),
            labels: Some(labels),
            owner_references: rollout.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: RemoteSyncSpec {
            cluster_ref: cluster.cluster_ref.clone(),
            sync_type: rollout.spec.sync_template.sync_type.clone(),
            template,
        },
        status: None,
    }
}

/// Slice the classified targets across waves.
///
/// Creates, updates and unchanged targets land in the wave containing their
/// cluster. Deletes land in the wave that previously owned the cluster,
/// falling back to the last wave when the cluster is no longer known.
pub fn partition(targets: Targets, waves: &[WaveView]) -> Vec<WaveTargets> {
    let wave_of: HashMap<&str, usize> = waves
        .iter()
        .enumerate()
        .flat_map(|(i, wave)| wave.targets.iter().map(move |name| (name.as_str(), i)))
        .collect();
    let last = waves.len().saturating_sub(1);

    let mut per_wave: Vec<WaveTargets> = waves.iter().map(|_| WaveTargets::default()).collect();
    if per_wave.is_empty() {
        return per_wave;
    }

    let place = |wave_of: &HashMap<&str, usize>, rs: &RemoteSync| {
        wave_of
            .get(rs.spec.cluster_ref.name.as_str())
            .copied()
            .unwrap_or(last)
    };

    for rs in targets.to_create {
        let i = place(&wave_of, &rs);
        per_wave[i].to_create.push(rs);
    }
    for rs in targets.to_update {
        let i = place(&wave_of, &rs);
        per_wave[i].to_update.push(rs);
    }
    for rs in targets.unchanged {
        let i = place(&wave_of, &rs);
        per_wave[i].unchanged.push(rs);
    }
    for rs in targets.to_delete {
        let i = place(&wave_of, &rs);
        per_wave[i].to_delete.push(rs);
    }
    per_wave
}
