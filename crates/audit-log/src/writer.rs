use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::AuditRecord;

#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("cannot open audit log {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit record is not serialisable: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit writer is no longer running")]
    Closed,
}

/// Buffered JSON-lines appender.
///
/// One [`write`](Self::write) is one line. Lines sit in memory until
/// [`flush`](Self::flush); the background sink decides when that happens.
pub struct AuditWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl AuditWriter {
    /// Attach to the log at `path`, creating it and any missing parent
    /// directories. Existing lines are kept; new ones go after them.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| AuditWriteError::Open {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_error)?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.out.flush().await?;
        Ok(())
    }
}
