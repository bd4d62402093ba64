use rollop_k8s_util::error::{Error, Result};

use std::collections::HashMap;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts";
/// Tokens are refreshed once less than this much validity remains.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);
/// `gcloud` access tokens do not report a lifetime; assume the documented hour.
const GCLOUD_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Credential chain selection, set once per process.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExternalAuthMode {
    /// On-machine application-default credentials via `gcloud`.
    Dev,
    /// GCE metadata server.
    #[default]
    Production,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub kube_service_account: String,
    pub external_service_account: String,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Bearer token source for target cluster connections.
///
/// Acquisition is expensive, so tokens are cached per (kube service account,
/// external service account) and refreshed shortly before expiry.
pub struct TokenSource {
    mode: ExternalAuthMode,
    http: reqwest::Client,
    cache: RwLock<HashMap<TokenKey, CachedToken>>,
}

impl TokenSource {
    pub fn new(mode: ExternalAuthMode) -> Self {
        Self {
            mode,
            http: reqwest::Client::new(),
            cache: RwLock::default(),
        }
    }

    pub async fn token(&self, key: &TokenKey) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(key) {
                if cached.expires_at.saturating_duration_since(Instant::now()) > EXPIRY_MARGIN {
                    trace!(msg = "reuse cached token", gsa = key.external_service_account);
                    return Ok(cached.token.clone());
                }
            }
        }

        let (token, lifetime) = match self.mode {
            ExternalAuthMode::Dev => self.fetch_gcloud_token(key).await?,
            ExternalAuthMode::Production => self.fetch_metadata_token(key).await?,
        };

        let cached = CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + lifetime,
        };
        self.cache.write().await.insert(key.clone(), cached);
        Ok(token)
    }

    async fn fetch_metadata_token(&self, key: &TokenKey) -> Result<(String, Duration)> {
        let account = if key.external_service_account.is_empty() {
            "default"
        } else {
            &key.external_service_account
        };
        debug!(msg = "fetching token from metadata server", account);
        let response = self
            .http
            .get(format!("{METADATA_TOKEN_URL}/{account}/token"))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                Error::ClusterStoreError(format!("metadata server token request failed: {e}"))
            })?;
        let token: MetadataTokenResponse = response.json().await.map_err(|e| {
            Error::ClusterStoreError(format!("invalid metadata server token response: {e}"))
        })?;
        Ok((
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }

    async fn fetch_gcloud_token(&self, key: &TokenKey) -> Result<(String, Duration)> {
        debug!(msg = "fetching token via gcloud application-default credentials");
        let mut command = Command::new("gcloud");
        command.args(["auth", "application-default", "print-access-token"]);
        if !key.external_service_account.is_empty() {
            command.arg(format!(
                "--impersonate-service-account={}",
                key.external_service_account
            ));
        }
        let output = command.output().await.map_err(|e| {
            Error::ClusterStoreError(format!("failed to run gcloud for dev credentials: {e}"))
        })?;
        if !output.status.success() {
            return Err(Error::ClusterStoreError(format!(
                "gcloud credential chain failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let token = String::from_utf8(output.stdout)
            .map_err(|e| Error::ClusterStoreError(format!("gcloud returned invalid token: {e}")))?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(Error::ClusterStoreError(
                "gcloud returned an empty token".to_string(),
            ));
        }
        Ok((token, GCLOUD_TOKEN_LIFETIME))
    }

    /// Test hook: seed the cache with a token and lifetime.
    #[cfg(test)]
    async fn seed(&self, key: TokenKey, token: &str, lifetime: Duration) {
        self.cache.write().await.insert(
            key,
            CachedToken {
                token: token.to_string(),
                expires_at: Instant::now() + lifetime,
            },
        );
    }
}
