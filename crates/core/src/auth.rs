use crate::traits::TokenProvider;
use crate::AnalysisError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

pub const HEALTHCARE_SCOPE: &str = "https://www.googleapis.com/auth/cloud-healthcare";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// A token supplied through configuration, e.g. minted by a sidecar.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _scope: &str) -> Result<String, AnalysisError> {
        if self.token.trim().is_empty() {
            return Err(AnalysisError::Auth("configured access token is empty".to_string()));
        }
        Ok(self.token.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: Option<String>,
}

/// Service account credentials from the GCE/Cloud Run metadata server.
#[derive(Debug, Clone)]
pub struct MetadataServerTokenProvider {
    client: Client,
    endpoint: String,
}

impl MetadataServerTokenProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: METADATA_TOKEN_URL.to_string(),
        }
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataServerTokenProvider {
    async fn access_token(&self, scope: &str) -> Result<String, AnalysisError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("scopes", scope)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|error| AnalysisError::Auth(format!("metadata server unreachable: {error}")))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Auth(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let payload: MetadataToken = response
            .json()
            .await
            .map_err(|error| AnalysisError::Auth(format!("metadata token unreadable: {error}")))?;

        payload
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AnalysisError::Auth("metadata server returned no access_token".to_string())
            })
    }
}

/// Shells out to `gcloud auth print-access-token`; convenient on developer
/// machines that already ran `gcloud auth login`.
#[derive(Debug, Clone)]
pub struct GcloudCliTokenProvider {
    program: String,
}

impl Default for GcloudCliTokenProvider {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
        }
    }
}

impl GcloudCliTokenProvider {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for GcloudCliTokenProvider {
    async fn access_token(&self, scope: &str) -> Result<String, AnalysisError> {
        debug!(program = %self.program, scope, "requesting access token from gcloud");

        let output = Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|error| {
                AnalysisError::Auth(format!("failed to run {}: {error}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Auth(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AnalysisError::Auth(format!("{} printed no token", self.program)));
        }

        Ok(token)
    }
}
