use crate::models::PipelineStage;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No file or text provided for processing.")]
    NoInput,

    #[error("Only PDF files are allowed (received {declared}).")]
    UnsupportedType { declared: String },

    #[error("File exceeds the {} MB size limit ({size_bytes} bytes received).", .limit_bytes / (1024 * 1024))]
    TooLarge { size_bytes: u64, limit_bytes: u64 },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("uploaded file does not exist: {0}")]
    NotFound(String),

    #[error("uploaded file could not be read: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    Corrupt(String),

    #[error("pdf had no readable text")]
    EmptyContent,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("credential acquisition failed: {0}")]
    Auth(String),

    #[error("{service} returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Upstream {
        service: &'static str,
        status: u16,
        message: Option<String>,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shape problems in a generative response. Never surfaced to callers; the
/// summarizer turns these into the sentinel summary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedResponseError {
    #[error("response body is not json")]
    NotJson,

    #[error("response has no candidates")]
    NoCandidates,

    #[error("first candidate has no content")]
    NoContent,

    #[error("candidate content has no parts")]
    NoParts,

    #[error("first part has no text")]
    NoText,

    #[error("summary text is blank")]
    EmptyText,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("failed to stage upload: {0}")]
    Staging(std::io::Error),

    #[error("entity analysis failed: {0}")]
    EntityAnalysis(AnalysisError),

    #[error("No entities extracted from the text.")]
    NoEntities,

    #[error("summarization failed: {0}")]
    Summarization(AnalysisError),
}

impl PipelineError {
    /// HTTP status the failure maps to: input problems are 400, everything
    /// else is 500.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Validation(_) | PipelineError::Extraction(_) => 400,
            PipelineError::Staging(_)
            | PipelineError::EntityAnalysis(_)
            | PipelineError::NoEntities
            | PipelineError::Summarization(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Message returned to the caller in the `message` field.
    pub fn message(&self) -> String {
        match self {
            PipelineError::Validation(error) => error.to_string(),
            PipelineError::Extraction(ExtractionError::NotFound(_)) => {
                "Uploaded file does not exist.".to_string()
            }
            PipelineError::Extraction(ExtractionError::Corrupt(_))
            | PipelineError::Extraction(ExtractionError::Unreadable(_)) => {
                "The uploaded PDF could not be read.".to_string()
            }
            PipelineError::Extraction(ExtractionError::EmptyContent) => {
                "No valid text found in the PDF.".to_string()
            }
            PipelineError::Staging(_) => "Internal Server Error".to_string(),
            PipelineError::EntityAnalysis(AnalysisError::Auth(_)) => {
                "Failed to acquire credentials for entity analysis.".to_string()
            }
            PipelineError::EntityAnalysis(error) => format!("Failed to analyze entities: {error}"),
            PipelineError::NoEntities => self.to_string(),
            PipelineError::Summarization(error) => format!("Failed to generate summary: {error}"),
        }
    }
}

/// A pipeline error labeled with the stage that was being entered when it
/// happened.
#[derive(Debug, Error)]
#[error("pipeline failed before {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    pub fn new(stage: PipelineStage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    pub fn message(&self) -> String {
        self.error.message()
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
