//! Package revision discovery.
//!
//! Resolves a package-source selector into discovered package revisions.
//! Wildcarded scopes expand via anchored `*` patterns; results are cached
//! for a short TTL keyed by the literal source configuration. A transient
//! upstream failure is an error, never an empty result.

pub mod crd;
pub mod package;
pub mod pattern;

mod github;
mod gitlab;

pub use crd::{GitSelector, OciSelector, PackageSourceSpec, PackageSourceType};
pub use package::{DiscoveredPackage, GitPackage, GitProvider, OciPackage};

use rollop_k8s_util::error::{Error, Result};

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::trace;

const CACHE_TTL: Duration = Duration::from_secs(60);
const OCI_DEFAULT_REVISION: &str = "latest";

#[derive(Clone, Debug, Default)]
pub struct DiscoveryAuth {
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
}

struct CacheEntry {
    fetched_at: Instant,
    packages: Vec<DiscoveredPackage>,
}

/// Resolves package-source selectors into discovered package revisions.
pub struct PackageDiscovery {
    http: reqwest::Client,
    auth: DiscoveryAuth,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl PackageDiscovery {
    pub fn new(auth: DiscoveryAuth) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            cache: RwLock::default(),
        }
    }

    pub async fn discover(&self, source: &PackageSourceSpec) -> Result<Vec<DiscoveredPackage>> {
        let key = serde_json::to_string(source).map_err(|e| {
            Error::SerializationError("failed to encode package source".to_string(), e)
        })?;

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    trace!(msg = "reuse cached package discovery");
                    return Ok(entry.packages.clone());
                }
            }
        }

        let packages = self.resolve(source).await?;
        self.cache.write().await.insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                packages: packages.clone(),
            },
        );
        Ok(packages)
    }

    async fn resolve(&self, source: &PackageSourceSpec) -> Result<Vec<DiscoveredPackage>> {
        match source.source_type {
            PackageSourceType::GitHub => {
                let selector = source.github.as_ref().ok_or_else(|| {
                    Error::ConfigError(
                        "package source type GitHub requires a github selector".to_string(),
                    )
                })?;
                github::GitHubDiscovery {
                    http: &self.http,
                    token: self.auth.github_token.as_deref(),
                }
                .discover(selector)
                .await
            }
            PackageSourceType::GitLab => {
                let selector = source.gitlab.as_ref().ok_or_else(|| {
                    Error::ConfigError(
                        "package source type GitLab requires a gitlab selector".to_string(),
                    )
                })?;
                gitlab::GitLabDiscovery {
                    http: &self.http,
                    token: self.auth.gitlab_token.as_deref(),
                }
                .discover(selector)
                .await
            }
            PackageSourceType::Oci => {
                let selector = source.oci.as_ref().ok_or_else(|| {
                    Error::ConfigError(
                        "package source type OCI requires an oci selector".to_string(),
                    )
                })?;
                Ok(vec![DiscoveredPackage::Oci(OciPackage {
                    image: selector.image.clone(),
                    directory: selector.dir.clone(),
                    revision: OCI_DEFAULT_REVISION.to_string(),
                })])
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::{OciSelector, PackageSourceSpec, PackageSourceType};

    fn oci_source(image: &str) -> PackageSourceSpec {
        PackageSourceSpec {
            source_type: PackageSourceType::Oci,
            oci: Some(OciSelector {
                image: image.to_string(),
                dir: "manifests".to_string(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_oci_discovery_returns_single_package() {
        let discovery = PackageDiscovery::new(DiscoveryAuth::default());
        let packages = discovery
            .discover(&oci_source("us-docker.pkg.dev/proj/repo/pkg"))
            .await
            .unwrap();
        assert_eq!(
            packages,
            vec![DiscoveredPackage::Oci(OciPackage {
                image: "us-docker.pkg.dev/proj/repo/pkg".to_string(),
                directory: "manifests".to_string(),
                revision: "latest".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_literal_source() {
        let discovery = PackageDiscovery::new(DiscoveryAuth::default());
        discovery.discover(&oci_source("img-a")).await.unwrap();
        // a different selector is a different cache key, never a stale hit
        let packages = discovery.discover(&oci_source("img-b")).await.unwrap();
        assert_eq!(packages[0], DiscoveredPackage::Oci(OciPackage {
            image: "img-b".to_string(),
            directory: "manifests".to_string(),
            revision: "latest".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_missing_selector_is_config_error() {
        let discovery = PackageDiscovery::new(DiscoveryAuth::default());
        let source = PackageSourceSpec {
            source_type: PackageSourceType::GitHub,
            ..Default::default()
        };
        let err = discovery.discover(&source).await.unwrap_err();
        assert!(err.is_terminal());
    }
}
