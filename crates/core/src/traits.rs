use crate::{AnalysisError, EntityAnalysis, SummaryResult};
use async_trait::async_trait;

/// Source of bearer credentials for Google APIs.
#[async_trait]
pub trait TokenProvider {
    async fn access_token(&self, scope: &str) -> Result<String, AnalysisError>;
}

#[async_trait]
pub trait EntityAnalyzer {
    async fn analyze(&self, text: &str) -> Result<EntityAnalysis, AnalysisError>;
}

#[async_trait]
pub trait Summarizer {
    async fn summarize(&self, structured_text: &str) -> Result<SummaryResult, AnalysisError>;
}
