use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use report_summary_core::{
    EntityAnalyzer, PipelineInput, Summarizer, SummaryPipeline, TextExtractor, UploadedDocument,
    ValidationError, PDF_MIME_TYPE,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const UPLOAD_ROUTE: &str = "/api/healthcare/upload";
const FILE_FIELD: &str = "pdfFile";
const TEXT_FIELD: &str = "text";

/// Room for multipart framing and the inline text field on top of the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

pub struct AppState<X, A, S>
where
    X: TextExtractor,
    A: EntityAnalyzer,
    S: Summarizer,
{
    pipeline: Arc<SummaryPipeline<X, A, S>>,
    max_upload_bytes: u64,
}

impl<X, A, S> Clone for AppState<X, A, S>
where
    X: TextExtractor,
    A: EntityAnalyzer,
    S: Summarizer,
{
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

pub fn router<X, A, S>(pipeline: SummaryPipeline<X, A, S>) -> Router
where
    X: TextExtractor + Send + Sync + 'static,
    A: EntityAnalyzer + Send + Sync + 'static,
    S: Summarizer + Send + Sync + 'static,
{
    let max_upload_bytes = pipeline.validator().max_upload_bytes();
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let state = AppState {
        pipeline: Arc::new(pipeline),
        max_upload_bytes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route(UPLOAD_ROUTE, post(upload::<X, A, S>))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upload<X, A, S>(
    State(state): State<AppState<X, A, S>>,
    mut multipart: Multipart,
) -> Response
where
    X: TextExtractor + Send + Sync + 'static,
    A: EntityAnalyzer + Send + Sync + 'static,
    S: Summarizer + Send + Sync + 'static,
{
    let input = match read_form(&mut multipart, state.max_upload_bytes).await {
        Ok(input) => input,
        Err(FormError::TooLarge) => {
            let error = ValidationError::TooLarge {
                size_bytes: state.max_upload_bytes.saturating_add(1),
                limit_bytes: state.max_upload_bytes,
            };
            return error_response(StatusCode::BAD_REQUEST, error.to_string());
        }
        Err(FormError::Malformed(error)) => {
            warn!(%error, "rejecting malformed multipart request");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid upload request: {}", error.body_text()),
            );
        }
    };

    match state.pipeline.run(input).await {
        Ok(outcome) => {
            info!(request_id = %outcome.request_id, "sending summary");
            (
                StatusCode::OK,
                Json(SummaryResponse {
                    summary: outcome.summary.text,
                }),
            )
                .into_response()
        }
        Err(failure) => {
            let status = StatusCode::from_u16(failure.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, failure.message())
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { message })).into_response()
}

enum FormError {
    TooLarge,
    Malformed(MultipartError),
}

impl From<MultipartError> for FormError {
    fn from(error: MultipartError) -> Self {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            FormError::TooLarge
        } else {
            FormError::Malformed(error)
        }
    }
}

/// Collects the `pdfFile` and `text` fields. Unknown fields are skipped.
async fn read_form(
    multipart: &mut Multipart,
    max_upload_bytes: u64,
) -> Result<PipelineInput, FormError> {
    let mut document = None;
    let mut text = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some(FILE_FIELD) => {
                let read = read_file_field(field, max_upload_bytes).await?;
                let oversized = read.size_bytes > max_upload_bytes;
                document = Some(read);
                if oversized {
                    // The validator rejects it; the rest of the body is not needed.
                    break;
                }
            }
            Some(TEXT_FIELD) => text = Some(field.text().await?),
            _ => {}
        }
    }

    Ok(PipelineInput::from_parts(document, text))
}

/// Reads a file field chunk by chunk and stops one chunk past the limit, so
/// an oversized upload is never buffered whole.
async fn read_file_field(
    mut field: Field<'_>,
    max_upload_bytes: u64,
) -> Result<UploadedDocument, FormError> {
    let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
    let mime = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| guess_mime(&file_name));

    let mut bytes = Vec::new();
    let mut seen = 0u64;
    while let Some(chunk) = field.chunk().await? {
        seen = seen.saturating_add(chunk.len() as u64);
        if seen > max_upload_bytes {
            break;
        }
        bytes.extend_from_slice(&chunk);
    }

    let mut document = UploadedDocument::new(file_name, mime, bytes);
    document.size_bytes = seen;
    Ok(document)
}

fn guess_mime(file_name: &str) -> String {
    if file_name.to_ascii_lowercase().ends_with(".pdf") {
        PDF_MIME_TYPE.to_string()
    } else {
        "application/octet-stream".to_string()
    }
}
