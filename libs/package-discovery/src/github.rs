use crate::crd::GitSelector;
use crate::package::{DiscoveredPackage, GitPackage, GitProvider};
use crate::pattern::{is_wildcard, wildcard_match};

use rollop_k8s_util::error::{Error, Result};

use serde::Deserialize;
use tracing::debug;

const GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct Repository {
    name: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

pub(crate) struct GitHubDiscovery<'a> {
    pub http: &'a reqwest::Client,
    pub token: Option<&'a str>,
}

impl GitHubDiscovery<'_> {
    pub async fn discover(&self, selector: &GitSelector) -> Result<Vec<DiscoveredPackage>> {
        let branch = selector.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
        let revision = if selector.revision.is_empty() {
            branch
        } else {
            &selector.revision
        };

        let repos = if is_wildcard(&selector.repo) {
            self.matching_repos(&selector.org, &selector.repo).await?
        } else {
            vec![selector.repo.clone()]
        };

        let mut packages = Vec::new();
        for repo in repos {
            let directories = if is_wildcard(&selector.directory) {
                self.matching_directories(&selector.org, &repo, branch, &selector.directory)
                    .await?
            } else {
                vec![selector.directory.clone()]
            };
            for directory in directories {
                packages.push(DiscoveredPackage::Git(GitPackage {
                    provider: GitProvider::GitHub,
                    org: selector.org.clone(),
                    repo: repo.clone(),
                    branch: branch.to_string(),
                    revision: revision.to_string(),
                    directory,
                    http_url: format!("https://github.com/{}/{repo}.git", selector.org),
                    ssh_url: format!("git@github.com:{}/{repo}.git", selector.org),
                }));
            }
        }
        debug!(msg = "discovered GitHub packages", count = packages.len(), org = selector.org);
        Ok(packages)
    }

    async fn matching_repos(&self, org: &str, pattern: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let url =
                format!("{GITHUB_API_URL}/orgs/{org}/repos?per_page={PAGE_SIZE}&page={page}");
            let repos: Vec<Repository> = self.get(&url).await?;
            let count = repos.len();
            for repo in repos {
                if wildcard_match(pattern, &repo.name)? {
                    names.push(repo.name);
                }
            }
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        names.sort();
        Ok(names)
    }

    async fn matching_directories(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        pattern: &str,
    ) -> Result<Vec<String>> {
        let url = format!("{GITHUB_API_URL}/repos/{org}/{repo}/git/trees/{branch}?recursive=true");
        let tree: TreeResponse = self.get(&url).await?;
        let mut directories = tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "tree")
            .map(|entry| entry.path)
            .filter_map(|path| match wildcard_match(pattern, &path) {
                Ok(true) => Some(Ok(path)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>>>()?;
        directories.sort();
        Ok(directories)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "rollop");
        if let Some(token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::DiscoveryError(format!("GitHub request {url} failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| Error::DiscoveryError(format!("invalid GitHub response from {url}: {e}")))
    }
}
