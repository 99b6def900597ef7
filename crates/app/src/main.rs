mod config;
mod http;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Settings;
use report_summary_core::{
    ExtractionError, LopdfParser, NormalizedText, PdfTextExtractor, PipelineInput, TextExtractor,
    UploadedDocument, PDF_MIME_TYPE,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "report-summary", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the upload API.
    Serve {
        /// Interface to bind.
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on.
        #[arg(long, env = "PORT", default_value_t = 5000)]
        port: u16,
    },
    /// Summarize one report and print the result.
    Summarize {
        /// PDF report to summarize.
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Report text to summarize instead of a file.
        #[arg(long)]
        text: Option<String>,
    },
    /// Print the normalized text of a PDF without calling any service.
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "report-summary boot"
    );

    match cli.command {
        Command::Serve { host, port } => {
            let pipeline = cli.settings.build_pipeline()?;
            let app = http::router(pipeline);

            let listener = tokio::net::TcpListener::bind((host.as_str(), port))
                .await
                .with_context(|| format!("failed to bind {host}:{port}"))?;
            info!(address = %listener.local_addr()?, "listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server terminated unexpectedly")?;
        }
        Command::Summarize { file, text } => {
            let pipeline = cli.settings.build_pipeline()?;
            let document = match file {
                Some(path) => Some(read_document(&path).await?),
                None => None,
            };

            let outcome = pipeline
                .run(PipelineInput::from_parts(document, text))
                .await
                .map_err(|failure| {
                    anyhow::anyhow!("{} (status {})", failure.message(), failure.status_code())
                })?;

            info!(
                request_id = %outcome.request_id,
                mentions = outcome.mention_count,
                "summary ready"
            );
            println!("{}", outcome.summary.text);
        }
        Command::Extract { file } => {
            let text = tokio::task::spawn_blocking(move || extract_file(&file))
                .await
                .context("extraction task panicked")??;
            println!("{}", text.content);
        }
    }

    Ok(())
}

fn extract_file(path: &Path) -> Result<NormalizedText, ExtractionError> {
    PdfTextExtractor::new(LopdfParser).extract(path)
}

async fn read_document(path: &Path) -> anyhow::Result<UploadedDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());
    let is_pdf = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"));
    let mime = if is_pdf {
        PDF_MIME_TYPE
    } else {
        "application/octet-stream"
    };

    Ok(UploadedDocument::new(file_name, mime, bytes))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
