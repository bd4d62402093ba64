use serde::Serialize;

/// A resolved package revision, ready to be projected into a sync spec.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DiscoveredPackage {
    Git(GitPackage),
    Oci(OciPackage),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GitPackage {
    pub provider: GitProvider,
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub revision: String,
    pub directory: String,
    pub http_url: String,
    pub ssh_url: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum GitProvider {
    #[default]
    GitHub,
    GitLab,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitProvider::GitHub => "github",
            GitProvider::GitLab => "gitlab",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OciPackage {
    pub image: String,
    pub directory: String,
    pub revision: String,
}

impl DiscoveredPackage {
    /// Short source kind used in derived object names.
    pub fn source_kind(&self) -> &'static str {
        match self {
            DiscoveredPackage::Git(git) => git.provider.as_str(),
            DiscoveredPackage::Oci(_) => "oci",
        }
    }

    pub fn directory(&self) -> &str {
        match self {
            DiscoveredPackage::Git(git) => &git.directory,
            DiscoveredPackage::Oci(oci) => &oci.directory,
        }
    }

    pub fn revision(&self) -> &str {
        match self {
            DiscoveredPackage::Git(git) => &git.revision,
            DiscoveredPackage::Oci(oci) => &oci.revision,
        }
    }
}
