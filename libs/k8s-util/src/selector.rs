use crate::error::{Error, Result};

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::Selector;
use kube::core::SelectorExt;

/// Evaluate a Kubernetes label selector against a label map.
///
/// An absent selector selects everything, matching API server semantics for
/// empty selectors.
pub fn selects(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> Result<bool> {
    let Some(selector) = selector else {
        return Ok(true);
    };
    let parsed = Selector::try_from(selector.clone())
        .map_err(|e| Error::ConfigError(format!("invalid label selector: {e}")))?;
    Ok(parsed.matches(labels))
}
