use anyhow::Context as _;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::debug;

/// GCP tokens last an hour; refresh this many seconds early.
const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
}

/// Access-token provider backed by Application Default Credentials:
/// metadata server on GCP, gcloud CLI locally. Tokens are cached until
/// shortly before expiry.
#[derive(Clone)]
pub struct GcpAuth {
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    client: reqwest::Client,
}

impl GcpAuth {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            cached_token: Arc::new(RwLock::new(None)),
            client,
        }
    }

    /// A valid bearer token, refreshed if the cached one is stale.
    pub async fn token(&self) -> anyhow::Result<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.fetch_new_token().await?;

        let mut cache = self.cached_token.write().await;
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(3600 - TOKEN_REFRESH_BUFFER_SECS),
        });
        Ok(token)
    }

    async fn fetch_new_token(&self) -> anyhow::Result<String> {
        // Metadata server works in Cloud Run, GCE and GKE.
        if let Ok(token) = self.fetch_from_metadata_server().await {
            debug!("Obtained GCP token from metadata server");
            return Ok(token);
        }

        // Local development after `gcloud auth application-default login`.
        if let Ok(token) = self.fetch_from_gcloud_cli().await {
            debug!("Obtained GCP token from gcloud CLI");
            return Ok(token);
        }

        anyhow::bail!(
            "Could not obtain GCP credentials. In GCP, ensure the service account \
             has access. Locally, run: gcloud auth application-default login"
        )
    }

    async fn fetch_from_metadata_server(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("metadata server unreachable")?
            .error_for_status()
            .context("metadata server rejected token request")?;

        let token: MetadataTokenResponse = response
            .json()
            .await
            .context("parsing metadata token response")?;
        Ok(token.access_token)
    }

    async fn fetch_from_gcloud_cli(&self) -> anyhow::Result<String> {
        let output = Command::new("gcloud")
            .args(["auth", "application-default", "print-access-token"])
            .output()
            .await
            .context("failed to run gcloud")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gcloud auth failed: {stderr}");
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            anyhow::bail!("gcloud returned empty token");
        }
        Ok(token)
    }
}

/// Resolve the active GCP project from the gcloud CLI, for environments
/// where GCP_PROJECT_ID is not exported.
pub async fn detect_project() -> anyhow::Result<String> {
    let output = Command::new("gcloud")
        .args(["config", "get-value", "project"])
        .output()
        .await
        .context("failed to run gcloud")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("gcloud config lookup failed: {stderr}");
    }

    let project = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if project.is_empty() || project == "(unset)" {
        anyhow::bail!(
            "GCP_PROJECT_ID not set and gcloud has no default project. \
             Set via: export GCP_PROJECT_ID='your-project-id'"
        );
    }
    Ok(project)
}
