use crate::models::UploadedDocument;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Writes accepted uploads into the uploads directory for the extractor.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    dir: PathBuf,
}

impl UploadStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stage(&self, document: &UploadedDocument) -> io::Result<StagedUpload> {
        fs::create_dir_all(&self.dir)?;

        let mut file = Builder::new()
            .prefix("upload-")
            .suffix(".pdf")
            .tempfile_in(&self.dir)?;
        file.write_all(&document.bytes)?;
        file.flush()?;

        debug!(
            path = %file.path().display(),
            original_file_name = %document.original_file_name,
            size_bytes = document.size_bytes,
            "staged upload"
        );

        Ok(StagedUpload { file: Some(file) })
    }
}

/// A staged upload. The file is removed when this value is dropped, on every
/// exit path of the request that owns it.
#[derive(Debug)]
pub struct StagedUpload {
    file: Option<NamedTempFile>,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        match &self.file {
            Some(file) => file.path(),
            None => Path::new(""),
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!(path = %path.display(), "removed staged upload"),
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to remove staged upload")
                }
            }
        }
    }
}

/// Hex SHA-256 of the uploaded bytes, used to correlate log lines for one
/// document across requests.
pub fn document_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
