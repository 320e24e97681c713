//! Writing exported CSV files to disk and handing them to a share sheet.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{MeasureError, Result};

/// MIME type of a single exported CSV file.
pub const CSV_MIME_TYPE: &str = "text/csv";
/// MIME type of an archive of several CSV files.
pub const ZIP_MIME_TYPE: &str = "application/zip";

/// One named CSV document produced by a service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvFile {
    /// Name without extension.
    pub name: String,
    /// CSV content.
    pub csv: String,
}

impl CsvFile {
    /// Creates a file.
    #[must_use]
    pub fn new(name: impl Into<String>, csv: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            csv: csv.into(),
        }
    }
}

/// Platform hook that offers a file to the user.
#[async_trait]
pub trait ShareSheet: Send + Sync + Debug {
    /// Offers the file at `path` with the given MIME type.
    async fn share(&self, path: &Path, mime_type: &str) -> Result<()>;
}

/// What to do when sharing an exported file fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharePolicy {
    /// Log the failure; the export still counts as successful.
    #[default]
    BestEffort,
    /// Fail the export.
    Strict,
}

/// A file written by [`Exporter::export`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedFile {
    /// Location on disk.
    pub path: PathBuf,
    /// MIME type passed to the share sheet.
    pub mime_type: &'static str,
    /// Whether the share sheet accepted the file.
    pub shared: bool,
}

/// Writes CSV documents to a directory and shares the result.
#[derive(Debug, Clone)]
pub struct Exporter {
    directory: PathBuf,
    share_sheet: Arc<dyn ShareSheet>,
    policy: SharePolicy,
}

impl Exporter {
    /// Creates an exporter writing into `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, share_sheet: Arc<dyn ShareSheet>) -> Self {
        Self {
            directory: directory.into(),
            share_sheet,
            policy: SharePolicy::default(),
        }
    }

    /// Sets the share failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SharePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The output directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes the files of a service and shares them.
    ///
    /// A single file is written as `exported_data_{service}_{name}.csv`.
    /// Several files are packed into `exported_data_{service}.zip` with one
    /// `{name}.csv` entry each. Returns `None` when there is nothing to write.
    ///
    /// # Errors
    /// Returns [`MeasureError::Export`] if writing fails, or if sharing fails
    /// under [`SharePolicy::Strict`].
    pub async fn export(&self, service_key: &str, files: Vec<CsvFile>) -> Result<Option<ExportedFile>> {
        let (file_name, content, mime_type) = match files.as_slice() {
            [] => {
                debug!(service_key, "Nothing to export");
                return Ok(None);
            }
            [single] => (
                format!("exported_data_{service_key}_{}.csv", single.name),
                single.csv.clone().into_bytes(),
                CSV_MIME_TYPE,
            ),
            many => (
                format!("exported_data_{service_key}.zip"),
                zip_files(many)?,
                ZIP_MIME_TYPE,
            ),
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| MeasureError::Export(e.to_string()))?;
        let path = self.directory.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| MeasureError::Export(e.to_string()))?;
        debug!(service_key, path = %path.display(), "Wrote export");

        let shared = match self.share_sheet.share(&path, mime_type).await {
            Ok(()) => true,
            Err(e) => match self.policy {
                SharePolicy::BestEffort => {
                    warn!(service_key, error = %e, "Failed to share export");
                    false
                }
                SharePolicy::Strict => {
                    return Err(MeasureError::Export(format!("Share failed: {e}")));
                }
            },
        };

        Ok(Some(ExportedFile {
            path,
            mime_type,
            shared,
        }))
    }
}

fn zip_files(files: &[CsvFile]) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in files {
        writer
            .start_file(format!("{}.csv", file.name), options)
            .map_err(|e| MeasureError::Export(e.to_string()))?;
        writer
            .write_all(file.csv.as_bytes())
            .map_err(|e| MeasureError::Export(e.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| MeasureError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}
