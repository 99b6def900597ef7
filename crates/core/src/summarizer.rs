use crate::client::upstream_error;
use crate::traits::Summarizer;
use crate::{AnalysisError, ConfigError, MalformedResponseError, SummaryResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use url::Url;

pub const SERVICE_NAME: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: Url,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::Missing("gemini api key"));
        }

        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            endpoint: Url::parse(DEFAULT_ENDPOINT)?,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = Url::parse(endpoint)?;
        Ok(self)
    }

    fn generate_url(&self) -> Result<Url, ConfigError> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(&format!("v1beta/models/{}:generateContent", self.model))?)
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Client for the Gemini `generateContent` method.
pub struct GeminiClient {
    client: Client,
    url: Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(client: Client, config: GeminiConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            url: config.generate_url()?,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(&self, structured_text: &str) -> Result<SummaryResult, AnalysisError> {
        let prompt = build_prompt(structured_text);

        let response = self
            .client
            .post(self.url.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(SERVICE_NAME, response).await);
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<Value>(&body)
            .map_err(|_| MalformedResponseError::NotJson)
            .and_then(|payload| extract_summary(&payload));

        Ok(summary_or_sentinel(parsed))
    }
}

/// Prompt that asks the model for a plain-language, patient-facing summary of
/// the rendered entity listing.
pub fn build_prompt(structured_text: &str) -> String {
    format!(
        "The following data contains key medical entities extracted from a patient's document. \
Each entity includes its type, description, associated medical concepts, and confidence levels:

Extracted Medical Entities:
{structured_text}

Task:
Summarize the above medical details in a clear, patient-friendly manner.
Explain all medical terms in simple language, so that a non-medical person can understand their condition, symptoms, and treatment options.
Use a well-structured, professional, and empathetic tone.
Highlight critical findings and their implications while keeping the explanation concise.
Provide actionable next steps where relevant, such as potential treatments, risks, or lifestyle adjustments.
Do not use any formatting such as bold, headings, or special characters. The output must be plain text.
Use simple bullet points for clarity and readability.
"
    )
}

/// Pulls `candidates[0].content.parts[0].text` out of a response.
pub fn extract_summary(payload: &Value) -> Result<SummaryResult, MalformedResponseError> {
    let candidate = match payload.get("candidates").and_then(Value::as_array) {
        Some(candidates) => match candidates.first() {
            Some(candidate) => candidate,
            None => return Err(MalformedResponseError::NoCandidates),
        },
        None => return Err(MalformedResponseError::NoCandidates),
    };

    let content = match candidate.get("content") {
        Some(content) if content.is_object() => content,
        _ => return Err(MalformedResponseError::NoContent),
    };

    let part = match content.get("parts").and_then(Value::as_array) {
        Some(parts) => match parts.first() {
            Some(part) => part,
            None => return Err(MalformedResponseError::NoParts),
        },
        None => return Err(MalformedResponseError::NoParts),
    };

    match part.get("text").and_then(Value::as_str) {
        Some(text) if text.trim().is_empty() => Err(MalformedResponseError::EmptyText),
        Some(text) => Ok(SummaryResult {
            text: text.trim().to_string(),
        }),
        None => Err(MalformedResponseError::NoText),
    }
}

/// Malformed responses are not failures: the caller gets the sentinel and
/// the anomaly is logged.
pub fn summary_or_sentinel(parsed: Result<SummaryResult, MalformedResponseError>) -> SummaryResult {
    match parsed {
        Ok(summary) => {
            info!(chars = summary.text.len(), "summary generated");
            debug!(summary = %summary.text, "summary text");
            summary
        }
        Err(reason) => {
            error!(%reason, "failed to extract summary from generative response");
            SummaryResult::unavailable()
        }
    }
}
