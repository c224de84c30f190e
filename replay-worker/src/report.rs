use std::path::{Path, PathBuf};

use async_trait::async_trait;
use replay_common::record::{header_line, ComparisonRow};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::ReportError;

/// Destination for comparison rows. Implementations must keep concurrent rows from interleaving.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn append_row(&self, row: &ComparisonRow) -> Result<(), ReportError>;
}

/// A comma separated report file with a header naming both endpoint versions.
pub struct CsvReport {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvReport {
    /// Create the report, replacing any existing file, and write its header line.
    pub async fn create(
        path: impl AsRef<Path>,
        version_a: &str,
        version_b: &str,
    ) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        let create_error = |error| ReportError::CreateError {
            path: path.display().to_string(),
            error,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(create_error)?;

        file.write_all(header_line(version_a, version_b).as_bytes())
            .await
            .map_err(create_error)?;
        file.flush().await.map_err(create_error)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for CsvReport {
    /// Append one row. The file lock is held until the row has been flushed.
    async fn append_row(&self, row: &ComparisonRow) -> Result<(), ReportError> {
        let line = row.to_line();
        let mut file = self.file.lock().await;

        file.write_all(line.as_bytes())
            .await
            .map_err(ReportError::AppendError)?;
        file.flush().await.map_err(ReportError::AppendError)?;

        Ok(())
    }
}
