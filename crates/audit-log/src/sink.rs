use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditRecord;
use crate::writer::{AuditWriteError, AuditWriter};

/// Records that may queue up before `write` starts waiting on the disk.
const QUEUE_DEPTH: usize = 1024;

/// Idle time after which buffered lines are flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Write side of an audit store.
///
/// Implementations must tolerate concurrent writers: every connection the
/// gate serves writes into the same store without coordinating with the
/// others, and no transaction spans more than one record.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn write(&self, record: AuditRecord) -> Result<(), AuditWriteError>;
}

/// Cloneable [`AuditStore`] backed by a JSON-lines file.
///
/// Handles push into a bounded queue; one background task owns the
/// [`AuditWriter`] and is the only thing touching the file.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditSink {
    /// Open the log at `path` (created with its parent directories when
    /// missing, appended to otherwise) and start the writer task.
    ///
    /// The returned handle completes after the last `AuditSink` clone is
    /// dropped and the remaining lines have been flushed. Write failures
    /// inside the task are logged and the record is dropped.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let writer = AuditWriter::new(path).await?;
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(drain_queue(writer, rx));
        Ok((Self { tx }, handle))
    }
}

#[async_trait]
impl AuditStore for AuditSink {
    /// Queue a record for the background writer.
    ///
    /// Waits for queue space when the writer is behind. Fails only when the
    /// background task has already exited.
    async fn write(&self, record: AuditRecord) -> Result<(), AuditWriteError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| AuditWriteError::Closed)
    }
}

enum Next {
    Record(AuditRecord),
    Idle,
    Closed,
}

async fn next(rx: &mut mpsc::Receiver<AuditRecord>, pending: usize) -> Next {
    // Nothing to flush: no reason to wake up until a record arrives.
    let received = if pending == 0 {
        rx.recv().await
    } else {
        match tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await {
            Ok(received) => received,
            Err(_) => return Next::Idle,
        }
    };
    match received {
        Some(record) => Next::Record(record),
        None => Next::Closed,
    }
}

async fn drain_queue(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditRecord>) {
    let mut pending = 0usize;
    loop {
        match next(&mut rx, pending).await {
            Next::Record(record) => match writer.write(&record).await {
                Ok(()) => pending += 1,
                Err(err) => {
                    tracing::error!(%err, method = ?record.method, "dropping audit record")
                }
            },
            Next::Idle => flush(&mut writer, &mut pending).await,
            Next::Closed => {
                flush(&mut writer, &mut pending).await;
                tracing::debug!(path = %writer.path().display(), "audit writer stopped");
                return;
            }
        }
    }
}

async fn flush(writer: &mut AuditWriter, pending: &mut usize) {
    if *pending == 0 {
        return;
    }
    match writer.flush().await {
        Ok(()) => {
            tracing::trace!(records = *pending, "audit log flushed");
            *pending = 0;
        }
        Err(err) => tracing::error!(%err, records = *pending, "audit log flush failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entry::Direction;

    #[tokio::test]
    async fn records_from_concurrent_writers_all_land_in_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let (sink, handle) = AuditSink::open(&path).await.unwrap();
        let store: Arc<dyn AuditStore> = Arc::new(sink);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for j in 0..10 {
                    let record = AuditRecord::request(
                        Direction::UpstreamToDownstream,
                        "session/prompt",
                        serde_json::json!({ "writer": i, "seq": j }),
                    );
                    store.write(record).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        drop(store);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 80);
        for line in contents.lines() {
            let record: AuditRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.direction, Direction::UpstreamToDownstream);
        }
    }

    #[tokio::test]
    async fn write_fails_once_the_writer_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, handle) = AuditSink::open(dir.path().join("audit.jsonl"))
            .await
            .unwrap();

        handle.abort();
        let _ = handle.await;

        let err = sink
            .write(AuditRecord::notification(
                Direction::DownstreamToUpstream,
                "session/update",
                serde_json::Value::Null,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditWriteError::Closed));
    }

    #[tokio::test]
    async fn idle_queue_flushes_without_closing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, _handle) = AuditSink::open(&path).await.unwrap();

        sink.write(AuditRecord::request(
            Direction::UpstreamToDownstream,
            "initialize",
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

        let mut lines = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            lines = std::fs::read_to_string(&path).unwrap().lines().count();
            if lines == 1 {
                break;
            }
        }
        assert_eq!(lines, 1);
    }
}
