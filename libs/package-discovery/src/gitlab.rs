use crate::crd::GitSelector;
use crate::package::{DiscoveredPackage, GitPackage, GitProvider};
use crate::pattern::{is_wildcard, wildcard_match};

use rollop_k8s_util::error::{Error, Result};

use serde::Deserialize;
use tracing::debug;

const GITLAB_API_URL: &str = "https://gitlab.com/api/v4";
const DEFAULT_BRANCH: &str = "main";
const PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct Project {
    path: String,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

pub(crate) struct GitLabDiscovery<'a> {
    pub http: &'a reqwest::Client,
    pub token: Option<&'a str>,
}

impl GitLabDiscovery<'_> {
    pub async fn discover(&self, selector: &GitSelector) -> Result<Vec<DiscoveredPackage>> {
        let branch = selector.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
        let revision = if selector.revision.is_empty() {
            branch
        } else {
            &selector.revision
        };

        let repos = if is_wildcard(&selector.repo) {
            self.matching_projects(&selector.org, &selector.repo).await?
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
                    provider: GitProvider::GitLab,
                    org: selector.org.clone(),
                    repo: repo.clone(),
                    branch: branch.to_string(),
                    revision: revision.to_string(),
                    directory,
                    http_url: format!("https://gitlab.com/{}/{repo}.git", selector.org),
                    ssh_url: format!("git@gitlab.com:{}/{repo}.git", selector.org),
                }));
            }
        }
        debug!(msg = "discovered GitLab packages", count = packages.len(), group = selector.org);
        Ok(packages)
    }

    async fn matching_projects(&self, group: &str, pattern: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{GITLAB_API_URL}/groups/{group}/projects?per_page={PAGE_SIZE}&page={page}"
            );
            let projects: Vec<Project> = self.get(&url).await?;
            let count = projects.len();
            for project in projects {
                if wildcard_match(pattern, &project.path)? {
                    names.push(project.path);
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
        group: &str,
        repo: &str,
        branch: &str,
        pattern: &str,
    ) -> Result<Vec<String>> {
        let project_id = format!("{group}%2F{repo}");
        let url = format!(
            "{GITLAB_API_URL}/projects/{project_id}/repository/tree?recursive=true&ref={branch}&per_page={PAGE_SIZE}"
        );
        let entries: Vec<TreeEntry> = self.get(&url).await?;
        let mut directories = entries
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
        let mut request = self.http.get(url);
        if let Some(token) = self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }
        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::DiscoveryError(format!("GitLab request {url} failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| Error::DiscoveryError(format!("invalid GitLab response from {url}: {e}")))
    }
}
