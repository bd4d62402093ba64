use rollop_cluster_store::ClusterSourceSpec;
use rollop_package_discovery::PackageSourceSpec;
use rollop_remote_sync::crd::{SyncMetadataSpec, SyncType};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Back-label stamped on every RemoteSync owned by a Rollout.
pub static ROLLOUT_NAME_LABEL: &str = "gitops.kpt.dev/rollout-name";

/// A Rollout declares a fleet-wide sync intent: which packages go to which
/// clusters, and how fast the change is allowed to spread.
///
/// More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "rollop",
    group = "gitops.kpt.dev",
    version = "v1alpha1",
    kind = "Rollout",
    plural = "rollouts",
    singular = "rollout",
    shortname = "ro",
    namespaced,
    status = "RolloutStatus",
    doc = r#"Rollout progressively syncs discovered packages onto a fleet of target clusters."#,
    printcolumn = r#"{"name":"Overall","type":"string","jsonPath":".status.overall"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Where target clusters are discovered from.
    pub cluster_source: ClusterSourceSpec,

    /// Where packages are discovered from.
    pub package_source: PackageSourceSpec,

    /// Label selector restricting the discovered clusters this rollout
    /// targets. Absent selects all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<LabelSelector>,

    /// How discovered packages are paired with target clusters.
    #[serde(default)]
    pub package_to_target_matcher: PackageToTargetMatcher,

    /// Shape of the sync object projected onto each target cluster.
    pub sync_template: SyncTemplate,

    /// How fast the change spreads across the fleet.
    pub strategy: StrategySpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PackageToTargetMatcher {
    #[serde(rename = "type", default)]
    pub matcher_type: MatcherType,

    /// CEL expression over `cluster` and `rolloutPackage`, required for the
    /// Custom matcher. A (cluster, package) pair is included iff it
    /// evaluates to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_expression: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum MatcherType {
    #[default]
    AllClusters,
    Custom,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncTemplate {
    #[serde(rename = "type", default)]
    pub sync_type: SyncType,

    /// Extra metadata stamped onto the projected sync objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SyncMetadataSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(rename = "type", default)]
    pub strategy_type: StrategyType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateStrategy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progressive: Option<ProgressiveStrategyRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum StrategyType {
    #[default]
    AllAtOnce,
    RollingUpdate,
    Progressive,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateStrategy {
    /// Upper bound on concurrently non-synced sync objects.
    pub max_concurrent: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveStrategyRef {
    /// Name of the ProgressiveRolloutStrategy in the rollout's namespace.
    pub name: String,

    /// Advance gate: waves after the named wave perform no mutations until
    /// the gate moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_after_wave: Option<String>,
}

/// Most recent observed status of the Rollout. Read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    /// One of "Completed", "Progressing", "Stalled", "Waiting".
    pub overall: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_statuses: Option<Vec<WaveStatus>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_statuses: Option<Vec<ClusterStatus>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WaveStatus {
    pub name: String,

    pub status: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_statuses: Vec<ClusterStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Target cluster name.
    pub name: String,

    pub package_status: PackageStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    /// Name of the sync object carrying the package to this cluster.
    pub package_id: String,

    /// Raw status reported by the sync object, empty until first observed.
    #[serde(default)]
    pub sync_status: String,

    /// Derived state: "Progressing", "Synced", "Stalled", "Waiting" or
    /// "Waiting (Upcoming Wave)".
    pub status: String,
}

/// An ordered sequence of waves partitioning a rollout's target clusters.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "rollop",
    group = "gitops.kpt.dev",
    version = "v1alpha1",
    kind = "ProgressiveRolloutStrategy",
    plural = "progressiverolloutstrategies",
    singular = "progressiverolloutstrategy",
    shortname = "prs",
    namespaced,
    doc = r#"ProgressiveRolloutStrategy orders target clusters into waves with per-wave concurrency bounds."#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveRolloutStrategySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Waves in rollout order. Every cluster selected by the rollout must
    /// be selected by exactly one wave.
    pub waves: Vec<WaveSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WaveSpec {
    /// Unique within the strategy.
    pub name: String,

    /// Clusters belonging to this wave, selected from the rollout's
    /// target set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<LabelSelector>,

    /// Upper bound on concurrently non-synced sync objects in this wave.
    pub max_concurrent: i64,
}
