pub mod auth;
pub mod client;
pub mod error;
pub mod extractor;
pub mod models;
pub mod nlp;
pub mod normalizer;
pub mod orchestrator;
pub mod staging;
pub mod summarizer;
pub mod traits;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{
    GcloudCliTokenProvider, MetadataServerTokenProvider, StaticTokenProvider, HEALTHCARE_SCOPE,
};
pub use client::build_http_client;
pub use error::{
    AnalysisError, ConfigError, ExtractionError, MalformedResponseError, PipelineError,
    PipelineFailure, ValidationError,
};
pub use extractor::{reconstruct_text, LopdfParser, PdfParser, PdfTextExtractor, TextExtractor};
pub use models::{
    EntityAnalysis, MedicalEntity, MedicalEntityMention, NormalizedText, PipelineConfig,
    PipelineInput, PipelineStage, PositionedTextToken, RawPdfText, StructuredEntitySummary,
    SummaryResult, UploadedDocument, MAX_UPLOAD_BYTES, PDF_MIME_TYPE, SUMMARY_SENTINEL,
};
pub use nlp::{HealthcareNlpClient, HealthcareNlpConfig};
pub use normalizer::normalize;
pub use orchestrator::{PipelineOutcome, SummaryPipeline};
pub use staging::{StagedUpload, UploadStaging};
pub use summarizer::{GeminiClient, GeminiConfig};
pub use traits::{EntityAnalyzer, Summarizer, TokenProvider};
pub use validator::UploadValidator;
