use crate::error::ValidationError;
use crate::models::{PipelineConfig, PipelineInput, UploadedDocument};

#[derive(Debug, Clone)]
pub struct UploadValidator {
    accepted_mime_type: String,
    max_upload_bytes: u64,
}

impl UploadValidator {
    pub fn new(accepted_mime_type: impl Into<String>, max_upload_bytes: u64) -> Self {
        Self {
            accepted_mime_type: accepted_mime_type.into(),
            max_upload_bytes,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.accepted_mime_type.clone(), config.max_upload_bytes)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn validate(&self, input: &PipelineInput) -> Result<(), ValidationError> {
        match input {
            PipelineInput::Empty => Err(ValidationError::NoInput),
            PipelineInput::Text(text) if text.trim().is_empty() => Err(ValidationError::NoInput),
            PipelineInput::Text(_) => Ok(()),
            PipelineInput::Document(document) | PipelineInput::DocumentWithText(document, _) => {
                self.validate_document(document)
            }
        }
    }

    pub fn validate_document(&self, document: &UploadedDocument) -> Result<(), ValidationError> {
        let declared = mime_essence(&document.declared_mime_type);
        if !declared.eq_ignore_ascii_case(&self.accepted_mime_type) {
            return Err(ValidationError::UnsupportedType {
                declared: document.declared_mime_type.clone(),
            });
        }

        if document.size_bytes > self.max_upload_bytes {
            return Err(ValidationError::TooLarge {
                size_bytes: document.size_bytes,
                limit_bytes: self.max_upload_bytes,
            });
        }

        Ok(())
    }
}

impl Default for UploadValidator {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// `application/pdf; charset=binary` -> `application/pdf`
fn mime_essence(declared: &str) -> &str {
    declared.split(';').next().unwrap_or_default().trim()
}
