//! Package source fragments embedded in the Rollout custom resource.

use std::fmt;

#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where the rollout's packages are discovered from.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PackageSourceSpec {
    pub source_type: PackageSourceType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GitSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oci: Option<OciSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub enum PackageSourceType {
    #[default]
    GitHub,
    GitLab,
    #[serde(rename = "OCI")]
    Oci,
}

impl fmt::Display for PackageSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSourceType::GitHub => write!(f, "GitHub"),
            PackageSourceType::GitLab => write!(f, "GitLab"),
            PackageSourceType::Oci => write!(f, "OCI"),
        }
    }
}

/// Git repository scope. `repo` and `directory` accept `*` wildcards where
/// `*` matches any run of non-`/` characters, anchored to the full string.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct GitSelector {
    /// Organization (GitHub) or group (GitLab).
    pub org: String,

    /// Repository name or wildcard pattern.
    pub repo: String,

    /// Directory within the repository, or wildcard pattern. Empty selects
    /// the repository root.
    #[serde(default)]
    pub directory: String,

    /// Revision to sync. Defaults to the branch head.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,

    /// Branch whose tree is walked for wildcarded directories. Defaults to
    /// `main`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OciSelector {
    /// OCI image reference holding the package.
    pub image: String,

    /// Directory within the image. Empty selects the image root.
    #[serde(default)]
    pub dir: String,
}
