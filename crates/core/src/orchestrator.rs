use crate::extractor::TextExtractor;
use crate::staging::{document_digest, UploadStaging};
use crate::traits::{EntityAnalyzer, Summarizer};
use crate::validator::UploadValidator;
use crate::{
    ExtractionError, NormalizedText, PipelineConfig, PipelineError, PipelineFailure,
    PipelineInput, PipelineStage, SummaryResult, ValidationError,
};
use std::path::Path;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub request_id: Uuid,
    pub summary: SummaryResult,
    pub mention_count: usize,
    pub stage: PipelineStage,
}

/// Runs one request through validation, extraction, entity analysis and
/// summarization, strictly in that order.
pub struct SummaryPipeline<X, A, S>
where
    X: TextExtractor,
    A: EntityAnalyzer,
    S: Summarizer,
{
    validator: UploadValidator,
    staging: UploadStaging,
    extractor: X,
    analyzer: A,
    summarizer: S,
}

impl<X, A, S> SummaryPipeline<X, A, S>
where
    X: TextExtractor + Send + Sync,
    A: EntityAnalyzer + Send + Sync,
    S: Summarizer + Send + Sync,
{
    pub fn new(config: &PipelineConfig, extractor: X, analyzer: A, summarizer: S) -> Self {
        Self {
            validator: UploadValidator::from_config(config),
            staging: UploadStaging::new(config.uploads_dir.clone()),
            extractor,
            analyzer,
            summarizer,
        }
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    pub async fn run(&self, input: PipelineInput) -> Result<PipelineOutcome, PipelineFailure> {
        let request_id = Uuid::new_v4();
        let span = info_span!("pipeline", %request_id);

        let result = self.run_stages(request_id, input).instrument(span.clone()).await;

        let _entered = span.enter();
        match &result {
            Ok(outcome) => info!(
                stage = %outcome.stage,
                sentinel = outcome.summary.is_sentinel(),
                "pipeline delivered summary"
            ),
            Err(failure) => warn!(
                stage = %failure.stage,
                status = failure.status_code(),
                error = %failure.error,
                "pipeline failed"
            ),
        }

        result
    }

    async fn run_stages(
        &self,
        request_id: Uuid,
        input: PipelineInput,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        if let Some(document) = input.document() {
            info!(
                stage = %PipelineStage::Received,
                file_name = %document.original_file_name,
                mime = %document.declared_mime_type,
                size_bytes = document.size_bytes,
                "upload received"
            );
        } else {
            info!(stage = %PipelineStage::Received, "inline request received");
        }

        self.validator
            .validate(&input)
            .map_err(|error| PipelineFailure::new(PipelineStage::Validated, error))?;
        debug!(stage = %PipelineStage::Validated, "input accepted");

        // Dropped when this function returns, which removes the staged file.
        let staged = match input.document() {
            Some(document) => Some(self.staging.stage(document).map_err(|error| {
                PipelineFailure::new(PipelineStage::Extracted, PipelineError::Staging(error))
            })?),
            None => None,
        };

        // A posted file must hold text even when inline text replaces it.
        let extracted = match (input.document(), &staged) {
            (Some(document), Some(staged)) => {
                debug!(digest = %document_digest(&document.bytes), "extracting text");
                let extracted = extract_blocking(&self.extractor, staged.path())
                    .map_err(|error| PipelineFailure::new(PipelineStage::Extracted, error))?;
                if extracted.is_blank() {
                    return Err(PipelineFailure::new(
                        PipelineStage::Extracted,
                        ExtractionError::EmptyContent,
                    ));
                }
                Some(extracted)
            }
            _ => None,
        };

        let text = match (&input, extracted) {
            (PipelineInput::Text(text), _) | (PipelineInput::DocumentWithText(_, text), _) => {
                debug!("using inline text");
                NormalizedText {
                    content: text.trim().to_string(),
                }
            }
            (PipelineInput::Document(_), Some(extracted)) => extracted,
            _ => {
                return Err(PipelineFailure::new(
                    PipelineStage::Validated,
                    ValidationError::NoInput,
                ))
            }
        };

        if text.is_blank() {
            return Err(PipelineFailure::new(
                PipelineStage::Extracted,
                ExtractionError::EmptyContent,
            ));
        }
        info!(stage = %PipelineStage::Extracted, chars = text.content.len(), "text ready");
        debug!(text = %text.content, "extracted text");

        let analysis = self
            .analyzer
            .analyze(&text.content)
            .await
            .map_err(|error| {
                PipelineFailure::new(PipelineStage::Analyzed, PipelineError::EntityAnalysis(error))
            })?;

        if analysis.mentions.is_empty() || analysis.summary.text.trim().is_empty() {
            return Err(PipelineFailure::new(
                PipelineStage::Analyzed,
                PipelineError::NoEntities,
            ));
        }
        info!(
            stage = %PipelineStage::Analyzed,
            mentions = analysis.mentions.len(),
            "entities analyzed"
        );

        let summary = self
            .summarizer
            .summarize(&analysis.summary.text)
            .await
            .map_err(|error| {
                PipelineFailure::new(PipelineStage::Summarized, PipelineError::Summarization(error))
            })?;
        info!(
            stage = %PipelineStage::Summarized,
            sentinel = summary.is_sentinel(),
            "summary ready"
        );

        Ok(PipelineOutcome {
            request_id,
            summary,
            mention_count: analysis.summary.mention_count,
            stage: PipelineStage::Delivered,
        })
    }
}

/// PDF parsing is CPU bound; keep it off the async worker when the runtime
/// allows it.
fn extract_blocking<X: TextExtractor>(
    extractor: &X,
    path: &Path,
) -> Result<NormalizedText, ExtractionError> {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| extractor.extract(path))
        }
        _ => extractor.extract(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{LopdfParser, PdfTextExtractor};
    use crate::nlp::analysis_from_response;
    use crate::test_support::{pdf_document, text_line};
    use crate::{AnalysisError, EntityAnalysis, UploadedDocument, PDF_MIME_TYPE, SUMMARY_SENTINEL};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct CountingExtractor {
        calls: Arc<AtomicUsize>,
        saw_staged_file: Arc<Mutex<Option<bool>>>,
        text: Option<String>,
    }

    impl TextExtractor for CountingExtractor {
        fn extract(&self, path: &Path) -> Result<NormalizedText, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.saw_staged_file.lock().expect("lock") = Some(path.exists());
            match &self.text {
                Some(text) => Ok(NormalizedText {
                    content: text.clone(),
                }),
                None => Err(ExtractionError::EmptyContent),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingAnalyzer {
        received: Arc<Mutex<Vec<String>>>,
        fail_with_status: Option<u16>,
        no_mentions: bool,
    }

    #[async_trait]
    impl EntityAnalyzer for RecordingAnalyzer {
        async fn analyze(&self, text: &str) -> Result<EntityAnalysis, AnalysisError> {
            self.received.lock().expect("lock").push(text.to_string());
            if let Some(status) = self.fail_with_status {
                return Err(AnalysisError::Upstream {
                    service: "healthcare-nlp",
                    status,
                    message: Some("The service is currently unavailable.".to_string()),
                });
            }
            if self.no_mentions {
                return Ok(analysis_from_response(&json!({ "entityMentions": [] })));
            }
            Ok(analysis_from_response(&json!({
                "entityMentions": [{
                    "mentionId": "1",
                    "type": "PROBLEM",
                    "text": { "content": "Diabetes Type 2" },
                    "confidence": 0.93
                }]
            })))
        }
    }

    #[derive(Clone, Default)]
    struct FixedSummarizer {
        received: Arc<Mutex<Vec<String>>>,
        sentinel: bool,
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, structured_text: &str) -> Result<SummaryResult, AnalysisError> {
            self.received.lock().expect("lock").push(structured_text.to_string());
            if self.sentinel {
                return Ok(SummaryResult::unavailable());
            }
            Ok(SummaryResult {
                text: "- You have type 2 diabetes.\n- Ask your doctor about diet changes.".to_string(),
            })
        }
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            uploads_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    fn pdf_upload(bytes: Vec<u8>) -> PipelineInput {
        PipelineInput::Document(UploadedDocument::new("report.pdf", PDF_MIME_TYPE, bytes))
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_page_report_is_summarized() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let analyzer = RecordingAnalyzer::default();
        let summarizer = FixedSummarizer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            PdfTextExtractor::new(LopdfParser),
            analyzer.clone(),
            summarizer.clone(),
        );

        let bytes = pdf_document(&[
            text_line(72, 720, "Patient has Diabetes Type2 140mg glucose"),
            text_line(72, 720, "Follow-up in 3months"),
        ]);
        let outcome = pipeline.run(pdf_upload(bytes)).await?;

        assert_eq!(outcome.stage, PipelineStage::Delivered);
        assert!(!outcome.summary.text.is_empty());
        assert_eq!(
            analyzer.received.lock().expect("lock")[0],
            "Patient has Diabetes Type 2 140 mg glucose\nFollow-up in 3 months"
        );
        assert!(summarizer.received.lock().expect("lock")[0].starts_with("Extracted Entities:"));
        assert_eq!(staged_files(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_upload_never_reaches_the_extractor() {
        let dir = tempdir().expect("tempdir");
        let extractor = CountingExtractor {
            text: Some("unused".to_string()),
            ..Default::default()
        };
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            RecordingAnalyzer::default(),
            FixedSummarizer::default(),
        );

        let mut document = UploadedDocument::new("scan.pdf", PDF_MIME_TYPE, b"%PDF-1.4".to_vec());
        document.size_bytes = 15 * 1024 * 1024;
        let failure = pipeline
            .run(PipelineInput::Document(document))
            .await
            .expect_err("15 MB upload must be rejected");

        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.stage, PipelineStage::Validated);
        assert!(failure.message().contains("size limit"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn non_pdf_upload_never_reaches_the_extractor() {
        let dir = tempdir().expect("tempdir");
        let extractor = CountingExtractor::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            RecordingAnalyzer::default(),
            FixedSummarizer::default(),
        );

        let input = PipelineInput::Document(UploadedDocument::new(
            "photo.png",
            "image/png",
            vec![0x89, 0x50, 0x4E, 0x47],
        ));
        let failure = pipeline.run(input).await.expect_err("png must be rejected");

        assert_eq!(failure.status_code(), 400);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_only_pdf_is_a_client_error() {
        use lopdf::content::Operation;

        let dir = tempdir().expect("tempdir");
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            PdfTextExtractor::new(LopdfParser),
            RecordingAnalyzer::default(),
            FixedSummarizer::default(),
        );

        let image_only = vec![Operation::new("q", vec![]), Operation::new("Q", vec![])];
        let failure = pipeline
            .run(pdf_upload(pdf_document(&[image_only])))
            .await
            .expect_err("textless pdf must fail");

        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.stage, PipelineStage::Extracted);
        assert_eq!(failure.message(), "No valid text found in the PDF.");
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upstream_outage_is_a_server_error_and_cleans_up() {
        let dir = tempdir().expect("tempdir");
        let extractor = CountingExtractor {
            text: Some("Patient has Diabetes Type 2".to_string()),
            ..Default::default()
        };
        let summarizer = FixedSummarizer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            RecordingAnalyzer {
                fail_with_status: Some(503),
                ..Default::default()
            },
            summarizer.clone(),
        );

        let failure = pipeline
            .run(pdf_upload(b"%PDF-1.4".to_vec()))
            .await
            .expect_err("503 must fail the run");

        assert_eq!(failure.status_code(), 500);
        assert_eq!(failure.stage, PipelineStage::Analyzed);
        assert!(failure.message().contains("503"));
        assert!(failure.message().contains("The service is currently unavailable."));
        assert_eq!(*extractor.saw_staged_file.lock().expect("lock"), Some(true));
        assert_eq!(staged_files(dir.path()), 0);
        assert!(summarizer.received.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn sentinel_summary_is_still_delivered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            CountingExtractor::default(),
            RecordingAnalyzer::default(),
            FixedSummarizer {
                sentinel: true,
                ..Default::default()
            },
        );

        let outcome = pipeline
            .run(PipelineInput::Text("Patient has Diabetes Type 2".to_string()))
            .await?;
        assert_eq!(outcome.stage, PipelineStage::Delivered);
        assert_eq!(outcome.summary.text, SUMMARY_SENTINEL);
        Ok(())
    }

    #[tokio::test]
    async fn inline_text_skips_extraction() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = CountingExtractor::default();
        let analyzer = RecordingAnalyzer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            analyzer.clone(),
            FixedSummarizer::default(),
        );

        pipeline
            .run(PipelineInput::Text("  Glucose 140 mg  ".to_string()))
            .await?;
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(analyzer.received.lock().expect("lock")[0], "Glucose 140 mg");
        Ok(())
    }

    #[tokio::test]
    async fn textless_file_fails_even_with_inline_text() {
        let dir = tempdir().expect("tempdir");
        let extractor = CountingExtractor::default();
        let analyzer = RecordingAnalyzer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            analyzer.clone(),
            FixedSummarizer::default(),
        );

        let document = UploadedDocument::new("scan.pdf", PDF_MIME_TYPE, b"%PDF-1.4".to_vec());
        let failure = pipeline
            .run(PipelineInput::from_parts(Some(document), Some("Glucose 140 mg".to_string())))
            .await
            .expect_err("textless file must fail");

        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.message(), "No valid text found in the PDF.");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert!(analyzer.received.lock().expect("lock").is_empty());
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn inline_text_wins_over_a_readable_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = CountingExtractor {
            text: Some("Blood pressure 120 over 80".to_string()),
            ..Default::default()
        };
        let analyzer = RecordingAnalyzer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            extractor.clone(),
            analyzer.clone(),
            FixedSummarizer::default(),
        );

        let document = UploadedDocument::new("report.pdf", PDF_MIME_TYPE, b"%PDF-1.4".to_vec());
        pipeline
            .run(PipelineInput::from_parts(Some(document), Some(" Glucose 140 mg ".to_string())))
            .await?;

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*extractor.saw_staged_file.lock().expect("lock"), Some(true));
        assert_eq!(analyzer.received.lock().expect("lock").as_slice(), ["Glucose 140 mg"]);
        assert_eq!(staged_files(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_input_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            CountingExtractor::default(),
            RecordingAnalyzer::default(),
            FixedSummarizer::default(),
        );

        let failure = pipeline
            .run(PipelineInput::Empty)
            .await
            .expect_err("empty request must fail");
        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.message(), "No file or text provided for processing.");
    }

    #[tokio::test]
    async fn no_entities_is_a_server_error() {
        let dir = tempdir().expect("tempdir");
        let summarizer = FixedSummarizer::default();
        let pipeline = SummaryPipeline::new(
            &config(dir.path()),
            CountingExtractor::default(),
            RecordingAnalyzer {
                no_mentions: true,
                ..Default::default()
            },
            summarizer.clone(),
        );

        let failure = pipeline
            .run(PipelineInput::Text("hello".to_string()))
            .await
            .expect_err("no entities must fail");
        assert_eq!(failure.status_code(), 500);
        assert_eq!(failure.message(), "No entities extracted from the text.");
        assert!(summarizer.received.lock().expect("lock").is_empty());
    }
}
