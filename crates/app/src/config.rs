use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, ValueEnum};
use reqwest::Client;
use report_summary_core::summarizer::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use report_summary_core::{
    build_http_client, AnalysisError, GcloudCliTokenProvider, GeminiClient, GeminiConfig,
    HealthcareNlpClient, HealthcareNlpConfig, LopdfParser, MetadataServerTokenProvider,
    PdfTextExtractor, PipelineConfig, StaticTokenProvider, SummaryPipeline, TokenProvider,
    MAX_UPLOAD_BYTES, PDF_MIME_TYPE,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub type AppPipeline =
    SummaryPipeline<PdfTextExtractor<LopdfParser>, HealthcareNlpClient<Credentials>, GeminiClient>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// Static token when one is configured, metadata server otherwise.
    Auto,
    Static,
    Metadata,
    Gcloud,
}

/// Settings shared by every subcommand. Secrets have no defaults.
#[derive(Clone, Args)]
pub struct Settings {
    /// Directory where uploads are staged while they are processed.
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    /// Largest accepted upload in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Timeout applied to every upstream request, in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Full `nlp:analyzeEntities` URL. Overrides project and location.
    #[arg(long, env = "HEALTHCARE_NLP_ENDPOINT")]
    pub nlp_endpoint: Option<String>,

    /// Google Cloud project hosting the Healthcare NLP service.
    #[arg(long, env = "HEALTHCARE_PROJECT")]
    pub healthcare_project: Option<String>,

    /// Healthcare NLP location.
    #[arg(long, env = "HEALTHCARE_LOCATION", default_value = "us-central1")]
    pub healthcare_location: String,

    /// How bearer credentials for the NLP service are obtained.
    #[arg(long, env = "HEALTHCARE_AUTH", value_enum, default_value_t = AuthMode::Auto)]
    pub auth: AuthMode,

    /// Bearer token used by the static auth mode.
    #[arg(long, env = "HEALTHCARE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name.
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub gemini_model: String,

    /// Gemini API base URL.
    #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub gemini_endpoint: String,
}

impl Settings {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_upload_bytes: self.max_upload_bytes,
            accepted_mime_type: PDF_MIME_TYPE.to_string(),
            uploads_dir: self.uploads_dir.clone(),
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
        }
    }

    fn nlp_config(&self) -> anyhow::Result<HealthcareNlpConfig> {
        let config = match (&self.nlp_endpoint, &self.healthcare_project) {
            (Some(endpoint), _) => HealthcareNlpConfig::from_endpoint(endpoint)?,
            (None, Some(project)) => {
                HealthcareNlpConfig::for_location(project, &self.healthcare_location)?
            }
            (None, None) => anyhow::bail!(
                "set HEALTHCARE_NLP_ENDPOINT or HEALTHCARE_PROJECT to reach the entity analysis service"
            ),
        };
        Ok(config)
    }

    fn credentials(&self, client: Client) -> anyhow::Result<Credentials> {
        let token = self
            .access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty());

        let credentials = match (self.auth, token) {
            (AuthMode::Static, None) => {
                anyhow::bail!("HEALTHCARE_AUTH=static requires HEALTHCARE_ACCESS_TOKEN")
            }
            (AuthMode::Static, Some(token)) | (AuthMode::Auto, Some(token)) => {
                Credentials::Static(StaticTokenProvider::new(token))
            }
            (AuthMode::Metadata, _) | (AuthMode::Auto, None) => {
                Credentials::Metadata(MetadataServerTokenProvider::new(client))
            }
            (AuthMode::Gcloud, _) => Credentials::Gcloud(GcloudCliTokenProvider::default()),
        };
        Ok(credentials)
    }

    pub fn build_pipeline(&self) -> anyhow::Result<AppPipeline> {
        let config = self.pipeline_config();
        let client = build_http_client(config.upstream_timeout)
            .context("failed to build upstream http client")?;

        let api_key = self
            .gemini_api_key
            .clone()
            .context("GEMINI_API_KEY is required")?;
        let gemini = GeminiConfig::new(api_key)?
            .with_model(self.gemini_model.clone())
            .with_endpoint(&self.gemini_endpoint)?;

        let nlp_config = self.nlp_config()?;
        let credentials = self.credentials(client.clone())?;

        info!(
            nlp_endpoint = %nlp_config.endpoint,
            gemini_model = %gemini.model,
            auth = credentials.kind(),
            uploads_dir = %config.uploads_dir.display(),
            max_upload_bytes = config.max_upload_bytes,
            "pipeline configured"
        );

        Ok(SummaryPipeline::new(
            &config,
            PdfTextExtractor::new(LopdfParser),
            HealthcareNlpClient::new(client.clone(), nlp_config, credentials),
            GeminiClient::new(client, gemini)?,
        ))
    }
}

/// The credential source picked at startup.
#[derive(Debug, Clone)]
pub enum Credentials {
    Static(StaticTokenProvider),
    Metadata(MetadataServerTokenProvider),
    Gcloud(GcloudCliTokenProvider),
}

impl Credentials {
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Static(_) => "static",
            Credentials::Metadata(_) => "metadata",
            Credentials::Gcloud(_) => "gcloud",
        }
    }
}

#[async_trait]
impl TokenProvider for Credentials {
    async fn access_token(&self, scope: &str) -> Result<String, AnalysisError> {
        match self {
            Credentials::Static(provider) => provider.access_token(scope).await,
            Credentials::Metadata(provider) => provider.access_token(scope).await,
            Credentials::Gcloud(provider) => provider.access_token(scope).await,
        }
    }
}
