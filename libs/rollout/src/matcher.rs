//! Pairing of discovered packages with target clusters.
//!
//! The Custom matcher evaluates a CEL expression per (cluster, package)
//! pair over two variables: `cluster {name, labels}` and `rolloutPackage`
//! with source-appropriate fields. The matcher is pure.

use crate::crd::{MatcherType, PackageToTargetMatcher};

use rollop_cluster_store::Cluster;
use rollop_k8s_util::error::{Error, Result};
use rollop_package_discovery::DiscoveredPackage;

use std::collections::BTreeMap;

use cel_interpreter::{Context, Program, Value};
use serde::Serialize;

#[derive(Serialize)]
struct ClusterVar<'a> {
    name: &'a str,
    labels: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PackageVar<'a> {
    org: &'a str,
    repo: &'a str,
    directory: &'a str,
    revision: &'a str,
    image: &'a str,
}

impl<'a> From<&'a DiscoveredPackage> for PackageVar<'a> {
    fn from(package: &'a DiscoveredPackage) -> Self {
        match package {
            DiscoveredPackage::Git(git) => PackageVar {
                org: &git.org,
                repo: &git.repo,
                directory: &git.directory,
                revision: &git.revision,
                image: "",
            },
            DiscoveredPackage::Oci(oci) => PackageVar {
                org: "",
                repo: "",
                directory: &oci.directory,
                revision: &oci.revision,
                image: &oci.image,
            },
        }
    }
}

/// Pair each cluster with the packages it should carry.
pub fn match_clusters(
    matcher: &PackageToTargetMatcher,
    clusters: &[Cluster],
    packages: &[DiscoveredPackage],
) -> Result<Vec<(Cluster, Vec<DiscoveredPackage>)>> {
    match matcher.matcher_type {
        MatcherType::AllClusters => Ok(clusters
            .iter()
            .map(|cluster| (cluster.clone(), packages.to_vec()))
            .collect()),
        MatcherType::Custom => {
            let expression = matcher.match_expression.as_deref().ok_or_else(|| {
                Error::ConfigError(
                    "custom matcher requires a matchExpression".to_string(),
                )
            })?;
            let program = Program::compile(expression).map_err(|e| {
                Error::ConfigError(format!("invalid matchExpression {expression:?}: {e}"))
            })?;
            clusters
                .iter()
                .map(|cluster| {
                    let matched = packages
                        .iter()
                        .filter_map(|package| {
                            match evaluate(&program, cluster, package) {
                                Ok(true) => Some(Ok(package.clone())),
                                Ok(false) => None,
                                Err(e) => Some(Err(e)),
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok((cluster.clone(), matched))
                })
                .collect()
        }
    }
}

fn evaluate(program: &Program, cluster: &Cluster, package: &DiscoveredPackage) -> Result<bool> {
    let mut context = Context::default();
    context
        .add_variable(
            "cluster",
            ClusterVar {
                name: cluster.name(),
                labels: &cluster.labels,
            },
        )
        .map_err(|e| Error::MatcherError(format!("failed to bind cluster variable: {e}")))?;
    context
        .add_variable("rolloutPackage", PackageVar::from(package))
        .map_err(|e| Error::MatcherError(format!("failed to bind rolloutPackage variable: {e}")))?;

    match program.execute(&context) {
        Ok(Value::Bool(included)) => Ok(included),
        Ok(other) => Err(Error::ConfigError(format!(
            "matchExpression must evaluate to a boolean, got {other:?}"
        ))),
        Err(e) => Err(Error::MatcherError(format!(
            "matchExpression evaluation failed: {e}"
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::match_clusters;
    use crate::crd::{MatcherType, PackageToTargetMatcher};

    use rollop_cluster_store::{Cluster, ClusterRef};
    use rollop_package_discovery::{DiscoveredPackage, GitPackage, GitProvider};

    fn cluster(name: &str) -> Cluster {
        Cluster {
            cluster_ref: ClusterRef {
                kind: Some("KindCluster".to_string()),
                name: name.to_string(),
                namespace: Some("default".to_string()),
            },
            labels: [("foo".to_string(), "bar".to_string())].into(),
        }
    }

    fn package(directory: &str) -> DiscoveredPackage {
        DiscoveredPackage::Git(GitPackage {
            provider: GitProvider::GitHub,
            org: "org".to_string(),
            repo: "repo".to_string(),
            branch: "main".to_string(),
            revision: "v0".to_string(),
            directory: directory.to_string(),
            http_url: "https://github.com/org/repo.git".to_string(),
            ssh_url: "git@github.com:org/repo.git".to_string(),
        })
    }

    fn custom(expression: &str) -> PackageToTargetMatcher {
        PackageToTargetMatcher {
            matcher_type: MatcherType::Custom,
            match_expression: Some(expression.to_string()),
        }
    }

    #[test]
    fn test_all_clusters_is_cartesian() {
        let clusters = vec![cluster("foo/0"), cluster("foo/1")];
        let packages = vec![package("a"), package("b")];
        let pairs =
            match_clusters(&PackageToTargetMatcher::default(), &clusters, &packages).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(_, pkgs)| pkgs.len() == 2));
    }

    #[test]
    fn test_custom_diagonal_pairing() {
        let clusters = vec![cluster("foo/0"), cluster("foo/1"), cluster("foo/2")];
        let packages = vec![package("foo/0"), package("foo/1"), package("foo/2")];
        let pairs = match_clusters(
            &custom("cluster.name == rolloutPackage.directory"),
            &clusters,
            &packages,
        )
        .unwrap();
        for (cluster, pkgs) in &pairs {
            assert_eq!(pkgs.len(), 1, "cluster {} must get one package", cluster.name());
            assert_eq!(pkgs[0].directory(), cluster.name());
        }
    }

    #[test]
    fn test_custom_can_use_labels() {
        let clusters = vec![cluster("foo/0")];
        let packages = vec![package("dir")];
        let pairs = match_clusters(
            &custom(r#"cluster.labels["foo"] == "bar""#),
            &clusters,
            &packages,
        )
        .unwrap();
        assert_eq!(pairs[0].1.len(), 1);
    }

    #[test]
    fn test_parse_error_is_terminal() {
        let err = match_clusters(&custom("cluster.name =="), &[cluster("c")], &[package("d")])
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_non_boolean_result_is_terminal() {
        let err = match_clusters(&custom("cluster.name"), &[cluster("c")], &[package("d")])
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_missing_expression_is_terminal() {
        let matcher = PackageToTargetMatcher {
            matcher_type: MatcherType::Custom,
            match_expression: None,
        };
        let err = match_clusters(&matcher, &[cluster("c")], &[package("d")]).unwrap_err();
        assert!(err.is_terminal());
    }
}
