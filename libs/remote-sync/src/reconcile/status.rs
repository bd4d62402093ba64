//! Normalization of the external sync object's observed status.

use kube::api::DynamicObject;
use serde_json::Value;

pub const SYNC_STATUS_SYNCED: &str = "Synced";
pub const SYNC_STATUS_PENDING: &str = "Pending";
pub const SYNC_STATUS_ERROR: &str = "Error";
pub const SYNC_STATUS_STALLED: &str = "Stalled";
pub const SYNC_STATUS_UNKNOWN: &str = "Unknown";

/// Compute the normalized sync status from the live external object.
///
/// Synced requires the last-synced commit/digest to equal the requested
/// revision (any non-empty sync when no revision was requested) with no
/// error conditions present; error conditions map to Error or Stalled;
/// everything else is Pending.
pub fn normalized_sync_status(external: &DynamicObject, requested_revision: &str) -> String {
    let status = &external.data["status"];
    if status.is_null() {
        return SYNC_STATUS_PENDING.to_string();
    }

    let generation = external.metadata.generation;
    let observed = status["observedGeneration"].as_i64();
    if generation.is_some() && observed.is_some() && generation != observed {
        return SYNC_STATUS_PENDING.to_string();
    }

    let conditions = status["conditions"].as_array();
    if let Some(conditions) = conditions {
        if conditions.iter().any(|c| {
            c["type"].as_str() == Some("Stalled") && c["status"].as_str() == Some("True")
        }) {
            return SYNC_STATUS_STALLED.to_string();
        }
        if conditions.iter().any(has_errors) {
            return SYNC_STATUS_ERROR.to_string();
        }
    }

    let last_synced = status["lastSyncedCommit"].as_str().unwrap_or_default();
    let synced = if requested_revision.is_empty() {
        !last_synced.is_empty()
    } else {
        last_synced == requested_revision
    };
    if synced {
        SYNC_STATUS_SYNCED.to_string()
    } else {
        SYNC_STATUS_PENDING.to_string()
    }
}

fn has_errors(condition: &Value) -> bool {
    if condition["errorSummary"]["totalCount"]
        .as_i64()
        .is_some_and(|count| count > 0)
    {
        return true;
    }
    condition["errors"]
        .as_array()
        .is_some_and(|errors| !errors.is_empty())
}
