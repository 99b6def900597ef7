use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const SUMMARY_SENTINEL: &str = "Summary not available.";

/// A file submitted by a client, held in memory for one request.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub bytes: Vec<u8>,
    pub declared_mime_type: String,
    pub size_bytes: u64,
    pub original_file_name: String,
    pub received_at: DateTime<Utc>,
}

impl UploadedDocument {
    pub fn new(
        original_file_name: impl Into<String>,
        declared_mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            bytes,
            declared_mime_type: declared_mime_type.into(),
            original_file_name: original_file_name.into(),
            received_at: Utc::now(),
        }
    }
}

/// What a caller handed to the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    Document(UploadedDocument),
    Text(String),
    /// A file and inline text together. The file is validated and must yield
    /// text; the inline text is what gets analyzed.
    DocumentWithText(UploadedDocument, String),
    Empty,
}

impl PipelineInput {
    pub fn from_parts(document: Option<UploadedDocument>, text: Option<String>) -> Self {
        let text = text.filter(|value| !value.trim().is_empty());
        match (document, text) {
            (Some(document), Some(text)) => PipelineInput::DocumentWithText(document, text),
            (Some(document), None) => PipelineInput::Document(document),
            (None, Some(text)) => PipelineInput::Text(text),
            (None, None) => PipelineInput::Empty,
        }
    }

    pub fn document(&self) -> Option<&UploadedDocument> {
        match self {
            PipelineInput::Document(document) | PipelineInput::DocumentWithText(document, _) => {
                Some(document)
            }
            PipelineInput::Text(_) | PipelineInput::Empty => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedTextToken {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub page: u32,
}

/// Output of the PDF parser boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPdfText {
    Flat(String),
    Positioned(Vec<PositionedTextToken>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub content: String,
}

impl NormalizedText {
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalEntityMention {
    pub id: String,
    pub mention_type: String,
    pub text: String,
    pub linked_entity_ids: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalEntity {
    pub id: String,
    pub preferred_term: String,
    pub vocabulary_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredEntitySummary {
    pub text: String,
    pub mention_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalysis {
    pub mentions: Vec<MedicalEntityMention>,
    pub entities: Vec<MedicalEntity>,
    pub summary: StructuredEntitySummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
}

impl SummaryResult {
    pub fn unavailable() -> Self {
        Self {
            text: SUMMARY_SENTINEL.to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.text == SUMMARY_SENTINEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Received,
    Validated,
    Extracted,
    Analyzed,
    Summarized,
    Delivered,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Validated => "validated",
            PipelineStage::Extracted => "extracted",
            PipelineStage::Analyzed => "analyzed",
            PipelineStage::Summarized => "summarized",
            PipelineStage::Delivered => "delivered",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_upload_bytes: u64,
    pub accepted_mime_type: String,
    pub uploads_dir: PathBuf,
    pub upstream_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            accepted_mime_type: PDF_MIME_TYPE.to_string(),
            uploads_dir: PathBuf::from("uploads"),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}
