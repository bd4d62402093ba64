use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    ApplyError(String, #[source] Box<kube::Error>),

    #[error("{0}")]
    ClusterStoreError(String),

    #[error("{0}")]
    ConfigError(String),

    #[error("waiting on dependent deletion: {0}")]
    DeletionPending(String),

    #[error("{0}")]
    DiscoveryError(String),

    #[error("{0}: {1}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(
        String,
        #[source] Box<kube::runtime::finalizer::Error<Error>>,
    ),

    #[error("{0}: {1}")]
    FormattingError(String, #[source] std::fmt::Error),

    #[error("{0}: {1}")]
    HttpError(String, #[source] Box<reqwest::Error>),

    #[error("{0}: {1}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("{0}")]
    MatcherError(String),

    #[error("{0}")]
    MissingData(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}")]
    StatusSyncError(String),

    #[error("{0}")]
    WatchError(String),
}

impl Error {
    /// Terminal errors come from the object's own spec and will not resolve by retrying
    /// with unchanged inputs. Matcher parse and type failures surface as
    /// `ConfigError`; `MatcherError` covers transient evaluation failures.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ConfigError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
