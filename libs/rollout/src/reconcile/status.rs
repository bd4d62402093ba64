//! Rollout status synthesis.

use crate::crd::{ClusterStatus, Rollout, RolloutStatus, WaveStatus};
use crate::scheduler::overall_status;

/// Build the aggregate status from the per-wave admission outcomes.
pub fn synthesize(
    rollout: &Rollout,
    wave_statuses: Vec<WaveStatus>,
    cluster_statuses: Vec<ClusterStatus>,
) -> RolloutStatus {
    let overall = overall_status(
        cluster_statuses
            .iter()
            .map(|s| s.package_status.status.as_str()),
    );
    RolloutStatus {
        overall: overall.to_string(),
        observed_generation: rollout.metadata.generation,
        wave_statuses: Some(wave_statuses),
        cluster_statuses: Some(cluster_statuses),
    }
}
