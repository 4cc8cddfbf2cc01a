//! Durable FIFO of scheduled prompts and its drain watcher.
//!
//! The queue is backed by a small JSON record on disk so pending prompts
//! survive a restart, and so external processes (a timer provider, a camera
//! watcher) can append entries of their own. All read-modify-write cycles go
//! through one lock and land via temp-file rename.
//!
//! Delivery is at-most-once: the watcher persists the shortened queue
//! *before* running the handler, so a crash mid-handler drops that prompt
//! rather than replaying it on the next start.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use proto::ScheduledPrompt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueRecord {
    prompts: Vec<ScheduledPrompt>,
}

/// Durable FIFO of system-originated prompts.
pub struct PromptQueue {
    path: PathBuf,
    lock: Mutex<()>,
    notify: Notify,
}

impl PromptQueue {
    /// Creates a queue backed by the given record path.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            lock: Mutex::new(()),
            notify: Notify::new(),
        })
    }

    /// Appends a prompt and nudges the watcher.
    pub async fn enqueue(&self, prompt: ScheduledPrompt) -> Result<(), std::io::Error> {
        let _guard = self.lock.lock().await;
        let mut record = read_record(&self.path).await;
        record.prompts.push(prompt);
        write_record(&self.path, &record).await?;
        drop(_guard);

        self.notify.notify_one();
        Ok(())
    }

    /// Pops the head prompt, persisting the shortened queue first.
    pub async fn pop(&self) -> Result<Option<ScheduledPrompt>, std::io::Error> {
        let _guard = self.lock.lock().await;
        let mut record = read_record(&self.path).await;
        if record.prompts.is_empty() {
            return Ok(None);
        }
        let prompt = record.prompts.remove(0);
        write_record(&self.path, &record).await?;
        debug!("Dequeued scheduled prompt ({} left)", record.prompts.len());
        Ok(Some(prompt))
    }

    /// Number of prompts currently waiting.
    pub async fn len(&self) -> usize {
        let _guard = self.lock.lock().await;
        read_record(&self.path).await.prompts.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drains the queue forever, one prompt at a time.
    ///
    /// Each prompt is removed from the durable record before `handler` runs
    /// and is delivered at most once, including across restarts. The poll
    /// interval picks up records written by external processes.
    pub async fn watch<F, Fut>(self: Arc<Self>, poll_interval: Duration, handler: F)
    where
        F: Fn(ScheduledPrompt) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("Scheduled prompt watcher started: {}", self.path.display());
        loop {
            match self.pop().await {
                Ok(Some(prompt)) => {
                    handler(prompt).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read prompt queue: {e}"),
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Reads the backing record, treating a missing or malformed file as empty.
async fn read_record(path: &Path) -> QueueRecord {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("Malformed prompt queue record, treating as empty: {e}");
                QueueRecord::default()
            }
        },
        Err(_) => QueueRecord::default(),
    }
}

/// Writes the record atomically via a temp file rename.
async fn write_record(path: &Path, record: &QueueRecord) -> Result<(), std::io::Error> {
    let bytes = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use proto::PromptKind;

    use super::*;

    fn queue_in(dir: &tempfile::TempDir) -> Arc<PromptQueue> {
        PromptQueue::new(dir.path().join("pending_prompts.json"))
    }

    #[tokio::test]
    async fn prompts_drain_in_fifo_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue_in(&dir);

        queue
            .enqueue(ScheduledPrompt::new("first", PromptKind::SystemTrigger))
            .await
            .expect("enqueue first");
        queue
            .enqueue(ScheduledPrompt::new(
                "second",
                PromptKind::DeveloperObservation,
            ))
            .await
            .expect("enqueue second");

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop().await.expect("pop").expect("prompt").text, "first");
        assert_eq!(
            queue.pop().await.expect("pop").expect("prompt").text,
            "second"
        );
        assert!(queue.pop().await.expect("pop").is_none());
    }

    #[tokio::test]
    async fn queue_survives_reopen_from_same_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pending_prompts.json");

        let queue = PromptQueue::new(&path);
        queue
            .enqueue(ScheduledPrompt::new("persisted", PromptKind::SystemTrigger))
            .await
            .expect("enqueue");
        drop(queue);

        let reopened = PromptQueue::new(&path);
        let prompt = reopened.pop().await.expect("pop").expect("prompt");
        assert_eq!(prompt.text, "persisted");
        assert_eq!(prompt.kind, PromptKind::SystemTrigger);
    }

    #[tokio::test]
    async fn pop_persists_removal_before_the_caller_processes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pending_prompts.json");
        let queue = PromptQueue::new(&path);
        queue
            .enqueue(ScheduledPrompt::new("only", PromptKind::SystemTrigger))
            .await
            .expect("enqueue");

        let _held = queue.pop().await.expect("pop").expect("prompt");

        // A crash here must not redeliver: the record is already shortened.
        let raw = tokio::fs::read_to_string(&path).await.expect("record");
        let record: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(record["prompts"].as_array().expect("array").len(), 0);
    }

    #[tokio::test]
    async fn malformed_record_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pending_prompts.json");
        tokio::fs::write(&path, b"{broken json")
            .await
            .expect("write garbage");

        let queue = PromptQueue::new(&path);
        assert!(queue.pop().await.expect("pop").is_none());
    }

    #[tokio::test]
    async fn watcher_delivers_each_prompt_once_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = queue_in(&dir);
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(4);

        let watcher = tokio::spawn(Arc::clone(&queue).watch(
            Duration::from_millis(20),
            move |prompt: ScheduledPrompt| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(prompt.text).await;
                }
            },
        ));

        queue
            .enqueue(ScheduledPrompt::new("p1", PromptKind::SystemTrigger))
            .await
            .expect("enqueue p1");
        queue
            .enqueue(ScheduledPrompt::new("p2", PromptKind::SystemTrigger))
            .await
            .expect("enqueue p2");

        assert_eq!(rx.recv().await.as_deref(), Some("p1"));
        assert_eq!(rx.recv().await.as_deref(), Some("p2"));

        // Drained: nothing left for a late-attaching consumer to replay.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty().await);
        watcher.abort();
    }

    #[tokio::test]
    async fn watcher_picks_up_records_written_externally() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pending_prompts.json");
        let queue = PromptQueue::new(&path);
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(1);

        let watcher = tokio::spawn(Arc::clone(&queue).watch(
            Duration::from_millis(20),
            move |prompt: ScheduledPrompt| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(prompt.text).await;
                }
            },
        ));

        // Simulate a timer provider writing the record directly.
        let record = serde_json::json!({
            "prompts": [ScheduledPrompt::new("external", PromptKind::SystemTrigger)]
        });
        tokio::fs::write(&path, record.to_string())
            .await
            .expect("external write");

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watcher should poll the file")
            .expect("prompt delivered");
        assert_eq!(received, "external");
        watcher.abort();
    }
}
