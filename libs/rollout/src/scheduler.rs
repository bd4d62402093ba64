//! Wave scheduling: strategy expansion, validation, admission control and
//! status precedence.
//!
//! The scheduler is pure. `admit` returns a plan of mutations instead of
//! performing them, so budgets, pause gates and ordering are testable
//! without a cluster; the reconciler executes the plan.

use crate::crd::{
    ClusterStatus, PackageStatus, ProgressiveRolloutStrategy, Rollout, StrategyType, WaveSpec,
};
use crate::targets::WaveTargets;

use rollop_cluster_store::Cluster;
use rollop_k8s_util::error::{Error, Result};
use rollop_k8s_util::selector::selects;
use rollop_remote_sync::crd::RemoteSync;
use rollop_remote_sync::reconcile::status::{SYNC_STATUS_ERROR, SYNC_STATUS_STALLED};

use kube::ResourceExt;

pub const STATUS_PROGRESSING: &str = "Progressing";
pub const STATUS_SYNCED: &str = "Synced";
pub const STATUS_STALLED: &str = "Stalled";
pub const STATUS_WAITING: &str = "Waiting";
pub const STATUS_WAITING_UPCOMING: &str = "Waiting (Upcoming Wave)";

pub const OVERALL_COMPLETED: &str = "Completed";
pub const OVERALL_PROGRESSING: &str = "Progressing";
pub const OVERALL_STALLED: &str = "Stalled";
pub const OVERALL_WAITING: &str = "Waiting";

/// Name of the implicit wave carrying simple strategies.
const DEFAULT_WAVE: &str = "default";

/// An expanded wave: ordered position, concurrency bound and the names of
/// the clusters it owns.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveView {
    pub name: String,
    /// None means unbounded.
    pub max_concurrent: Option<usize>,
    /// Sorted cluster names.
    pub targets: Vec<String>,
}

/// The expanded strategy: waves in declaration order plus the advance gate.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyView {
    pub waves: Vec<WaveView>,
    pub pause_after_wave: Option<String>,
}

/// Expand the rollout's strategy over the resolved cluster set.
///
/// Progressive strategies must be loaded by the caller; the other variants
/// expand to a single wave over all targets.
pub fn build(
    rollout: &Rollout,
    strategy: Option<&ProgressiveRolloutStrategy>,
    clusters: &[Cluster],
) -> Result<StrategyView> {
    let all_targets = || {
        let mut names: Vec<String> = clusters.iter().map(|c| c.name().to_string()).collect();
        names.sort();
        names
    };

    match rollout.spec.strategy.strategy_type {
        StrategyType::AllAtOnce => Ok(StrategyView {
            waves: vec![WaveView {
                name: DEFAULT_WAVE.to_string(),
                max_concurrent: None,
                targets: all_targets(),
            }],
            pause_after_wave: None,
        }),
        StrategyType::RollingUpdate => {
            let config = rollout.spec.strategy.rolling_update.as_ref().ok_or_else(|| {
                Error::ConfigError(
                    "strategy type RollingUpdate requires a rollingUpdate config".to_string(),
                )
            })?;
            if config.max_concurrent < 1 {
                return Err(Error::ConfigError(format!(
                    "rollingUpdate.maxConcurrent must be positive, got {}",
                    config.max_concurrent
                )));
            }
            Ok(StrategyView {
                waves: vec![WaveView {
                    name: DEFAULT_WAVE.to_string(),
                    max_concurrent: Some(config.max_concurrent as usize),
                    targets: all_targets(),
                }],
                pause_after_wave: None,
            })
        }
        StrategyType::Progressive => {
            let reference = rollout.spec.strategy.progressive.as_ref().ok_or_else(|| {
                Error::ConfigError(
                    "strategy type Progressive requires a progressive config".to_string(),
                )
            })?;
            let strategy = strategy.ok_or_else(|| {
                Error::ConfigError(format!(
                    "ProgressiveRolloutStrategy {} not found",
                    reference.name
                ))
            })?;
            let waves = validate(&strategy.spec.waves, clusters)?;
            let pause_after_wave = match &reference.pause_after_wave {
                Some(pause) => {
                    if !waves.iter().any(|w| &w.name == pause) {
                        return Err(Error::ConfigError(format!(
                            "pauseAfterWave {pause:?} does not name a wave of {}",
                            strategy.name_any()
                        )));
                    }
                    Some(pause.clone())
                }
                None => None,
            };
            Ok(StrategyView {
                waves,
                pause_after_wave,
            })
        }
    }
}

/// Validate that the waves partition the cluster set: every cluster in
/// exactly one wave, every wave nonempty, budgets positive.
pub fn validate(waves: &[WaveSpec], clusters: &[Cluster]) -> Result<Vec<WaveView>> {
    if waves.is_empty() {
        return Err(Error::ConfigError(
            "progressive strategy has no waves".to_string(),
        ));
    }

    let mut views: Vec<WaveView> = waves
        .iter()
        .map(|wave| {
            if wave.max_concurrent < 1 {
                return Err(Error::ConfigError(format!(
                    "wave {} maxConcurrent must be positive, got {}",
                    wave.name, wave.max_concurrent
                )));
            }
            Ok(WaveView {
                name: wave.name.clone(),
                max_concurrent: Some(wave.max_concurrent as usize),
                targets: Vec::new(),
            })
        })
        .collect::<Result<_>>()?;

    for cluster in clusters {
        let mut owners = Vec::new();
        for (i, wave) in waves.iter().enumerate() {
            if selects(wave.targets.as_ref(), &cluster.labels)? {
                owners.push(i);
            }
        }
        match owners.as_slice() {
            [] => {
                return Err(Error::ConfigError(format!(
                    "cluster {} is not covered by any wave",
                    cluster.name()
                )));
            }
            [i] => views[*i].targets.push(cluster.name().to_string()),
            many => {
                let names: Vec<&str> = many.iter().map(|&i| waves[i].name.as_str()).collect();
                return Err(Error::ConfigError(format!(
                    "cluster {} is covered by multiple waves: {}",
                    cluster.name(),
                    names.join(", ")
                )));
            }
        }
    }

    for view in &mut views {
        if view.targets.is_empty() {
            return Err(Error::ConfigError(format!(
                "wave {} selects no clusters",
                view.name
            )));
        }
        view.targets.sort();
    }
    Ok(views)
}

/// A mutation the reconciler must perform for an admitted target.
#[derive(Clone, Debug)]
pub enum Mutation {
    Create(RemoteSync),
    Update(RemoteSync),
    Delete(RemoteSync),
}

/// Outcome of admitting one wave.
#[derive(Debug, Default)]
pub struct WavePlan {
    /// Whether this wave consumed any concurrency budget; an in-progress
    /// wave pauses every later wave for this reconciliation.
    pub in_progress: bool,
    pub mutations: Vec<Mutation>,
    pub cluster_statuses: Vec<ClusterStatus>,
}

/// Admit the wave's targets against its concurrency budget.
///
/// Non-synced unchanged targets occupy budget first; creates, updates and
/// deletes then admit in that order, each list in cluster-name order. A
/// paused wave has budget zero and performs no mutations.
pub fn admit(wave: &WaveView, targets: &WaveTargets, paused: bool) -> WavePlan {
    let budget = if paused {
        0
    } else {
        wave.max_concurrent.unwrap_or(usize::MAX)
    };
    let mut used = 0usize;
    let mut plan = WavePlan::default();

    for rs in &targets.unchanged {
        if rs.is_synced() {
            plan.cluster_statuses.push(live_status(rs, STATUS_SYNCED));
        } else {
            used += 1;
            let derived = match live_sync_status(rs) {
                SYNC_STATUS_ERROR | SYNC_STATUS_STALLED => STATUS_STALLED,
                _ => STATUS_PROGRESSING,
            };
            plan.cluster_statuses.push(live_status(rs, derived));
        }
    }

    for rs in &targets.to_create {
        if used < budget {
            used += 1;
            plan.cluster_statuses.push(desired_status(rs, STATUS_PROGRESSING));
            plan.mutations.push(Mutation::Create(rs.clone()));
        } else {
            plan.cluster_statuses.push(desired_status(rs, waiting(paused)));
        }
    }

    for rs in &targets.to_update {
        if used < budget {
            used += 1;
            plan.cluster_statuses.push(desired_status(rs, STATUS_PROGRESSING));
            plan.mutations.push(Mutation::Update(rs.clone()));
        } else {
            plan.cluster_statuses.push(desired_status(rs, waiting(paused)));
        }
    }

    // deleted targets leave no status row: the cluster is no longer desired
    for rs in &targets.to_delete {
        if used < budget {
            used += 1;
            plan.mutations.push(Mutation::Delete(rs.clone()));
        }
    }

    plan.in_progress = used > 0;
    plan.cluster_statuses.sort_by(|a, b| a.name.cmp(&b.name));
    plan
}

fn waiting(paused: bool) -> &'static str {
    if paused {
        STATUS_WAITING_UPCOMING
    } else {
        STATUS_WAITING
    }
}

fn live_sync_status(rs: &RemoteSync) -> &str {
    rs.status
        .as_ref()
        .and_then(|s| s.sync_status.as_deref())
        .unwrap_or_default()
}

fn live_status(rs: &RemoteSync, derived: &str) -> ClusterStatus {
    ClusterStatus {
        name: rs.spec.cluster_ref.name.clone(),
        package_status: PackageStatus {
            package_id: rs.name_any(),
            sync_status: live_sync_status(rs).to_string(),
            status: derived.to_string(),
        },
    }
}

fn desired_status(rs: &RemoteSync, derived: &str) -> ClusterStatus {
    ClusterStatus {
        name: rs.spec.cluster_ref.name.clone(),
        package_status: PackageStatus {
            package_id: rs.name_any(),
            sync_status: String::new(),
            status: derived.to_string(),
        },
    }
}

/// Collapse derived statuses by precedence:
/// any Progressing, else any Stalled, else any Waiting, else Completed.
pub fn overall_status<'a>(statuses: impl IntoIterator<Item = &'a str>) -> &'static str {
    let mut stalled = false;
    let mut waiting = false;
    for status in statuses {
        match status {
            STATUS_PROGRESSING => return OVERALL_PROGRESSING,
            STATUS_STALLED => stalled = true,
            s if s.starts_with(STATUS_WAITING) => waiting = true,
            _ => {}
        }
    }
    if stalled {
        OVERALL_STALLED
    } else if waiting {
        OVERALL_WAITING
    } else {
        OVERALL_COMPLETED
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::{
        ProgressiveRolloutStrategySpec, ProgressiveStrategyRef, RollingUpdateStrategy, Rollout,
        RolloutSpec, StrategySpec, WaveSpec,
    };
    use crate::targets::WaveTargets;

    use rollop_cluster_store::{Cluster, ClusterRef};
    use rollop_remote_sync::crd::{RemoteSync, RemoteSyncSpec, RemoteSyncStatus};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;

    fn cluster(name: &str, labels: &[(&str, &str)]) -> Cluster {
        Cluster {
            cluster_ref: ClusterRef {
                kind: Some("KindCluster".to_string()),
                name: name.to_string(),
                namespace: Some("default".to_string()),
            },
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn selector(key: &str, value: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some([(key.to_string(), value.to_string())].into()),
            ..Default::default()
        }
    }

    fn remote_sync(name: &str, cluster: &str, sync_status: Option<&str>) -> RemoteSync {
        RemoteSync {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: RemoteSyncSpec {
                cluster_ref: ClusterRef {
                    kind: Some("KindCluster".to_string()),
                    name: cluster.to_string(),
                    namespace: Some("default".to_string()),
                },
                ..Default::default()
            },
            status: sync_status.map(|s| RemoteSyncStatus {
                sync_status: Some(s.to_string()),
                sync_created: true,
                ..Default::default()
            }),
        }
    }

    fn rollout_with_strategy(strategy: StrategySpec) -> Rollout {
        Rollout {
            metadata: ObjectMeta {
                name: Some("my-rollout".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: RolloutSpec {
                strategy,
                ..Default::default()
            },
            status: None,
        }
    }

    fn two_wave_strategy() -> ProgressiveRolloutStrategy {
        ProgressiveRolloutStrategy {
            metadata: ObjectMeta {
                name: Some("two-waves".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ProgressiveRolloutStrategySpec {
                description: None,
                waves: vec![
                    WaveSpec {
                        name: "wave-1".to_string(),
                        targets: Some(selector("wave", "1")),
                        max_concurrent: 2,
                    },
                    WaveSpec {
                        name: "wave-2".to_string(),
                        targets: Some(selector("wave", "2")),
                        max_concurrent: 1,
                    },
                ],
            },
        }
    }

    fn three_clusters() -> Vec<Cluster> {
        vec![
            cluster("foo/0", &[("foo", "bar"), ("wave", "1")]),
            cluster("foo/1", &[("foo", "bar"), ("wave", "1")]),
            cluster("foo/2", &[("foo", "bar"), ("wave", "2")]),
        ]
    }

    #[test]
    fn test_build_all_at_once_single_unbounded_wave() {
        let rollout = rollout_with_strategy(StrategySpec::default());
        let view = build(&rollout, None, &three_clusters()).unwrap();
        assert_eq!(view.waves.len(), 1);
        assert_eq!(view.waves[0].max_concurrent, None);
        assert_eq!(view.waves[0].targets, vec!["foo/0", "foo/1", "foo/2"]);
    }

    #[test]
    fn test_build_rolling_update_requires_positive_budget() {
        let rollout = rollout_with_strategy(StrategySpec {
            strategy_type: StrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdateStrategy { max_concurrent: 0 }),
            progressive: None,
        });
        assert!(build(&rollout, None, &three_clusters()).unwrap_err().is_terminal());
    }

    #[test]
    fn test_build_progressive_expands_waves() {
        let rollout = rollout_with_strategy(StrategySpec {
            strategy_type: StrategyType::Progressive,
            rolling_update: None,
            progressive: Some(ProgressiveStrategyRef {
                name: "two-waves".to_string(),
                pause_after_wave: Some("wave-1".to_string()),
            }),
        });
        let view = build(&rollout, Some(&two_wave_strategy()), &three_clusters()).unwrap();
        assert_eq!(view.waves.len(), 2);
        assert_eq!(view.waves[0].targets, vec!["foo/0", "foo/1"]);
        assert_eq!(view.waves[1].targets, vec!["foo/2"]);
        assert_eq!(view.pause_after_wave.as_deref(), Some("wave-1"));
    }

    #[test]
    fn test_build_rejects_unknown_pause_after_wave() {
        let rollout = rollout_with_strategy(StrategySpec {
            strategy_type: StrategyType::Progressive,
            rolling_update: None,
            progressive: Some(ProgressiveStrategyRef {
                name: "two-waves".to_string(),
                pause_after_wave: Some("wave-9".to_string()),
            }),
        });
        let err = build(&rollout, Some(&two_wave_strategy()), &three_clusters()).unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_validate_rejects_uncovered_cluster() {
        let strategy = two_wave_strategy();
        let clusters = vec![cluster("foo/9", &[("wave", "none")])];
        assert!(validate(&strategy.spec.waves, &clusters).unwrap_err().is_terminal());
    }

    #[test]
    fn test_validate_rejects_doubly_covered_cluster() {
        let waves = vec![
            WaveSpec {
                name: "wave-1".to_string(),
                targets: None,
                max_concurrent: 1,
            },
            WaveSpec {
                name: "wave-2".to_string(),
                targets: None,
                max_concurrent: 1,
            },
        ];
        let clusters = vec![cluster("foo/0", &[])];
        let err = validate(&waves, &clusters).unwrap_err();
        assert!(err.to_string().contains("multiple waves"));
    }

    #[test]
    fn test_validate_rejects_empty_wave() {
        let strategy = two_wave_strategy();
        let clusters = vec![cluster("foo/0", &[("wave", "1")])];
        let err = validate(&strategy.spec.waves, &clusters).unwrap_err();
        assert!(err.to_string().contains("selects no clusters"));
    }

    fn wave(max_concurrent: Option<usize>, targets: &[&str]) -> WaveView {
        WaveView {
            name: "default".to_string(),
            max_concurrent,
            targets: targets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_admit_all_at_once_creates_everything() {
        let targets = WaveTargets {
            to_create: vec![
                remote_sync("github-0-dir-0", "foo/0", None),
                remote_sync("github-0-dir-1", "foo/1", None),
            ],
            ..Default::default()
        };
        let plan = admit(&wave(None, &["foo/0", "foo/1"]), &targets, false);
        assert_eq!(plan.mutations.len(), 2);
        assert!(plan.in_progress);
        assert!(
            plan.cluster_statuses
                .iter()
                .all(|s| s.package_status.status == STATUS_PROGRESSING)
        );
    }

    #[test]
    fn test_admit_respects_concurrency_budget() {
        let targets = WaveTargets {
            to_create: vec![
                remote_sync("github-0-dir-0", "foo/0", None),
                remote_sync("github-0-dir-1", "foo/1", None),
            ],
            ..Default::default()
        };
        let plan = admit(&wave(Some(1), &["foo/0", "foo/1"]), &targets, false);
        assert_eq!(plan.mutations.len(), 1);
        // admission iterates in cluster-name order
        assert!(matches!(
            &plan.mutations[0],
            Mutation::Create(rs) if rs.spec.cluster_ref.name == "foo/0"
        ));
        assert_eq!(plan.cluster_statuses[0].package_status.status, STATUS_PROGRESSING);
        assert_eq!(plan.cluster_statuses[1].package_status.status, STATUS_WAITING);
    }

    #[test]
    fn test_admit_counts_unsynced_unchanged_against_budget() {
        let targets = WaveTargets {
            unchanged: vec![remote_sync("github-0-dir-0", "foo/0", Some("Pending"))],
            to_create: vec![remote_sync("github-0-dir-1", "foo/1", None)],
            ..Default::default()
        };
        let plan = admit(&wave(Some(1), &["foo/0", "foo/1"]), &targets, false);
        assert!(plan.mutations.is_empty());
        assert_eq!(plan.cluster_statuses[1].package_status.status, STATUS_WAITING);
    }

    #[test]
    fn test_admit_frees_budget_once_synced() {
        let targets = WaveTargets {
            unchanged: vec![remote_sync("github-0-dir-0", "foo/0", Some("Synced"))],
            to_create: vec![remote_sync("github-0-dir-1", "foo/1", None)],
            ..Default::default()
        };
        let plan = admit(&wave(Some(1), &["foo/0", "foo/1"]), &targets, false);
        assert_eq!(plan.mutations.len(), 1);
        assert_eq!(plan.cluster_statuses[0].package_status.status, STATUS_SYNCED);
        assert_eq!(plan.cluster_statuses[1].package_status.status, STATUS_PROGRESSING);
    }

    #[test]
    fn test_admit_paused_wave_performs_no_mutations() {
        let targets = WaveTargets {
            to_create: vec![remote_sync("github-0-dir-2", "foo/2", None)],
            to_update: vec![remote_sync("github-0-dir-3", "foo/3", None)],
            to_delete: vec![remote_sync("github-0-dir-4", "foo/4", None)],
            ..Default::default()
        };
        let plan = admit(&wave(Some(5), &["foo/2", "foo/3"]), &targets, true);
        assert!(plan.mutations.is_empty());
        assert!(!plan.in_progress);
        assert!(
            plan.cluster_statuses
                .iter()
                .all(|s| s.package_status.status == STATUS_WAITING_UPCOMING)
        );
    }

    #[test]
    fn test_admit_stalled_unchanged_reports_stalled() {
        let targets = WaveTargets {
            unchanged: vec![remote_sync("github-0-dir-0", "foo/0", Some("Error"))],
            ..Default::default()
        };
        let plan = admit(&wave(Some(1), &["foo/0"]), &targets, false);
        assert_eq!(plan.cluster_statuses[0].package_status.status, STATUS_STALLED);
        assert!(plan.in_progress);
    }

    #[test]
    fn test_overall_status_precedence() {
        assert_eq!(overall_status(["Progressing", "Stalled", "Waiting"]), "Progressing");
        assert_eq!(overall_status(["Stalled", "Waiting", "Synced"]), "Stalled");
        assert_eq!(overall_status(["Waiting (Upcoming Wave)", "Synced"]), "Waiting");
        assert_eq!(overall_status(["Synced", "Synced"]), "Completed");
        assert_eq!(overall_status([]), "Completed");
    }
}

/// Whole-plan scenarios: compute, partition and admit composed the way the
/// reconciler drives them, with the live set fed back between passes.
#[cfg(test)]
mod plan_test {
    use super::{Mutation, StrategyView, admit, build, overall_status};
    use crate::crd::{
        ProgressiveRolloutStrategy, ProgressiveRolloutStrategySpec, ProgressiveStrategyRef,
        RollingUpdateStrategy, Rollout, RolloutSpec, StrategySpec, StrategyType, WaveSpec,
    };
    use crate::targets::{compute, partition};

    use rollop_cluster_store::{Cluster, ClusterRef};
    use rollop_package_discovery::{DiscoveredPackage, GitPackage, GitProvider};
    use rollop_remote_sync::crd::{RemoteSync, RemoteSyncStatus};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::ResourceExt;
    use kube::api::ObjectMeta;

    fn cluster(name: &str, wave: Option<&str>) -> Cluster {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("foo".to_string(), "bar".to_string());
        if let Some(wave) = wave {
            labels.insert("wave".to_string(), wave.to_string());
        }
        Cluster {
            cluster_ref: ClusterRef {
                kind: Some("Membership".to_string()),
                name: name.to_string(),
                namespace: None,
            },
            labels,
        }
    }

    fn package() -> DiscoveredPackage {
        DiscoveredPackage::Git(GitPackage {
            provider: GitProvider::GitHub,
            org: "org".to_string(),
            repo: "repo".to_string(),
            branch: "main".to_string(),
            revision: "v0".to_string(),
            directory: "dir".to_string(),
            http_url: "https://github.com/org/repo.git".to_string(),
            ssh_url: "git@github.com:org/repo.git".to_string(),
        })
    }

    fn rollout(strategy: StrategySpec) -> Rollout {
        Rollout {
            metadata: ObjectMeta {
                name: Some("my-rollout".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("0000-1111".to_string()),
                ..Default::default()
            },
            spec: RolloutSpec {
                strategy,
                ..Default::default()
            },
            status: None,
        }
    }

    fn mark_synced(mut rs: RemoteSync) -> RemoteSync {
        rs.status = Some(RemoteSyncStatus {
            sync_status: Some("Synced".to_string()),
            sync_created: true,
            ..Default::default()
        });
        rs
    }

    /// One full planning pass: classify against the live set, slice across
    /// waves, admit each wave with pause propagation. Returns the per-wave
    /// plans and the applied mutations.
    fn plan(
        view: &StrategyView,
        rollout: &Rollout,
        pairs: &[(Cluster, Vec<DiscoveredPackage>)],
        existing: &[RemoteSync],
    ) -> (Vec<super::WavePlan>, Vec<Mutation>) {
        let per_wave = partition(compute(rollout, pairs, existing), &view.waves);
        let mut paused = false;
        let mut plans = Vec::new();
        let mut mutations = Vec::new();
        for (wave, targets) in view.waves.iter().zip(per_wave.iter()) {
            let wave_plan = admit(wave, targets, paused);
            if wave_plan.in_progress {
                paused = true;
            }
            if view.pause_after_wave.as_deref() == Some(wave.name.as_str()) {
                paused = true;
            }
            mutations.extend(wave_plan.mutations.clone());
            plans.push(wave_plan);
        }
        (plans, mutations)
    }

    fn created(mutations: &[Mutation]) -> Vec<RemoteSync> {
        mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::Create(rs) | Mutation::Update(rs) => Some(rs.clone()),
                Mutation::Delete(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_all_at_once_two_clusters_one_package() {
        let ro = rollout(StrategySpec::default());
        let clusters = vec![cluster("foo/0", None), cluster("foo/1", None)];
        let pairs: Vec<_> = clusters.iter().map(|c| (c.clone(), vec![package()])).collect();
        let view = build(&ro, None, &clusters).unwrap();

        let (plans, mutations) = plan(&view, &ro, &pairs, &[]);
        let names: Vec<String> = created(&mutations).iter().map(|rs| rs.name_any()).collect();
        assert_eq!(names, vec!["github-0-dir-0", "github-0-dir-1"]);
        let statuses: Vec<&str> = plans[0]
            .cluster_statuses
            .iter()
            .map(|s| s.package_status.status.as_str())
            .collect();
        assert_eq!(statuses, vec!["Progressing", "Progressing"]);
        assert_eq!(overall_status(statuses), "Progressing");
    }

    #[test]
    fn test_rolling_update_admits_second_cluster_after_first_syncs() {
        let ro = rollout(StrategySpec {
            strategy_type: StrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdateStrategy { max_concurrent: 1 }),
            progressive: None,
        });
        let clusters = vec![cluster("foo/0", None), cluster("foo/1", None)];
        let pairs: Vec<_> = clusters.iter().map(|c| (c.clone(), vec![package()])).collect();
        let view = build(&ro, None, &clusters).unwrap();

        // first pass: exactly one create, the other cluster waits
        let (plans, mutations) = plan(&view, &ro, &pairs, &[]);
        let live = created(&mutations);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].spec.cluster_ref.name, "foo/0");
        assert_eq!(plans[0].cluster_statuses[1].package_status.status, "Waiting");

        // second pass with the first synced: the second cluster is admitted
        let live: Vec<_> = live.into_iter().map(mark_synced).collect();
        let (_, mutations) = plan(&view, &ro, &pairs, &live);
        let second = created(&mutations);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].spec.cluster_ref.name, "foo/1");
    }

    fn progressive_fixture() -> (Rollout, ProgressiveRolloutStrategy, Vec<Cluster>) {
        let ro = rollout(StrategySpec {
            strategy_type: StrategyType::Progressive,
            rolling_update: None,
            progressive: Some(ProgressiveStrategyRef {
                name: "two-waves".to_string(),
                pause_after_wave: Some("wave-1".to_string()),
            }),
        });
        let strategy = ProgressiveRolloutStrategy {
            metadata: ObjectMeta {
                name: Some("two-waves".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ProgressiveRolloutStrategySpec {
                description: None,
                waves: vec![
                    WaveSpec {
                        name: "wave-1".to_string(),
                        targets: Some(LabelSelector {
                            match_labels: Some(
                                [("wave".to_string(), "1".to_string())].into(),
                            ),
                            ..Default::default()
                        }),
                        max_concurrent: 2,
                    },
                    WaveSpec {
                        name: "wave-2".to_string(),
                        targets: Some(LabelSelector {
                            match_labels: Some(
                                [("wave".to_string(), "2".to_string())].into(),
                            ),
                            ..Default::default()
                        }),
                        max_concurrent: 1,
                    },
                ],
            },
        };
        let clusters = vec![
            cluster("foo/0", Some("1")),
            cluster("foo/1", Some("1")),
            cluster("foo/2", Some("2")),
        ];
        (ro, strategy, clusters)
    }

    #[test]
    fn test_progressive_pause_after_wave_gates_advance() {
        let (ro, strategy, clusters) = progressive_fixture();
        let pairs: Vec<_> = clusters.iter().map(|c| (c.clone(), vec![package()])).collect();
        let view = build(&ro, Some(&strategy), &clusters).unwrap();

        // first pass: wave-1 creates both, wave-2 waits on the upcoming wave
        let (plans, mutations) = plan(&view, &ro, &pairs, &[]);
        let live = created(&mutations);
        assert_eq!(live.len(), 2);
        assert_eq!(
            plans[1].cluster_statuses[0].package_status.status,
            "Waiting (Upcoming Wave)"
        );

        // wave-1 synced but the gate still names wave-1: wave-2 stays paused
        let live: Vec<_> = live.into_iter().map(mark_synced).collect();
        let (plans, mutations) = plan(&view, &ro, &pairs, &live);
        assert!(created(&mutations).is_empty());
        assert_eq!(
            plans[1].cluster_statuses[0].package_status.status,
            "Waiting (Upcoming Wave)"
        );

        // gate advanced to wave-2: its cluster is admitted
        let mut advanced = view.clone();
        advanced.pause_after_wave = Some("wave-2".to_string());
        let (_, mutations) = plan(&advanced, &ro, &pairs, &live);
        let third = created(&mutations);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].spec.cluster_ref.name, "foo/2");
    }

    #[test]
    fn test_deselected_cluster_deletes_within_its_wave() {
        let ro = rollout(StrategySpec::default());
        let clusters = vec![cluster("foo/0", None), cluster("foo/1", None)];
        let pairs: Vec<_> = clusters.iter().map(|c| (c.clone(), vec![package()])).collect();
        let view = build(&ro, None, &clusters).unwrap();
        let (_, mutations) = plan(&view, &ro, &pairs, &[]);
        let live: Vec<_> = created(&mutations).into_iter().map(mark_synced).collect();

        // foo/1 falls out of the selector
        let narrowed_clusters = vec![clusters[0].clone()];
        let narrowed_pairs = vec![pairs[0].clone()];
        let narrowed_view = build(&ro, None, &narrowed_clusters).unwrap();
        let (plans, mutations) = plan(&narrowed_view, &ro, &narrowed_pairs, &live);
        assert!(matches!(
            mutations.as_slice(),
            [Mutation::Delete(rs)] if rs.spec.cluster_ref.name == "foo/1"
        ));
        // the surviving cluster keeps its synced row
        assert_eq!(plans[0].cluster_statuses.len(), 1);
        assert_eq!(plans[0].cluster_statuses[0].package_status.status, "Synced");
    }

    #[test]
    fn test_second_pass_with_unchanged_inputs_plans_nothing() {
        let ro = rollout(StrategySpec::default());
        let clusters = vec![cluster("foo/0", None), cluster("foo/1", None)];
        let pairs: Vec<_> = clusters.iter().map(|c| (c.clone(), vec![package()])).collect();
        let view = build(&ro, None, &clusters).unwrap();
        let (_, mutations) = plan(&view, &ro, &pairs, &[]);
        let live: Vec<_> = created(&mutations).into_iter().map(mark_synced).collect();

        let (plans, mutations) = plan(&view, &ro, &pairs, &live);
        assert!(mutations.is_empty());
        let statuses: Vec<&str> = plans[0]
            .cluster_statuses
            .iter()
            .map(|s| s.package_status.status.as_str())
            .collect();
        assert_eq!(overall_status(statuses), "Completed");
    }
}
