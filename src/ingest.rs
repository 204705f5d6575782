use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::FetchError;
use crate::fetcher::MediaFetcher;
use crate::notification::Notification;
use crate::vault;

/// Terminal state of one ingestion attempt.
#[derive(Debug)]
pub enum Outcome {
    /// No downloadable media in the event.
    Skipped,
    /// Media from a chat no recipient tracks.
    Ignored,
    Stored(PathBuf),
    Failed(FetchError),
}

/// Per-notification pipeline: classify, resolve, fetch.
///
/// Holds only read-only state, so one instance is shared by every task.
/// Dispatched tasks are tracked so shutdown can wait for them.
pub struct Ingestor {
    config: Arc<Config>,
    fetcher: MediaFetcher,
    tasks: TaskTracker,
}

impl Ingestor {
    pub fn new(config: Arc<Config>, fetcher: MediaFetcher) -> Self {
        Self {
            config,
            fetcher,
            tasks: TaskTracker::new(),
        }
    }

    /// Run the pipeline for one raw event. Never fails; errors become
    /// `Outcome::Failed` and are logged here.
    pub async fn handle(&self, raw: &Value) -> Outcome {
        let notification = Notification::classify(raw);

        let Some(category) = notification.downloadable_media() else {
            debug!(
                message_id = %notification.message_id,
                webhook = %notification.webhook_type,
                message_type = %notification.message_type,
                "No media, skipping"
            );
            return Outcome::Skipped;
        };

        let Some(destination) = vault::resolve(&notification, &self.config) else {
            debug!(
                message_id = %notification.message_id,
                chat_id = %notification.sender.chat_id,
                "Chat is not mapped to a recipient, ignoring"
            );
            return Outcome::Ignored;
        };

        match self
            .fetcher
            .fetch(
                &notification.file.download_url,
                destination,
                category,
                &notification.file.file_name,
            )
            .await
        {
            Ok(path) => {
                info!(
                    message_id = %notification.message_id,
                    chat_id = %notification.sender.chat_id,
                    chat_name = %notification.sender.chat_name,
                    sender = %notification.sender.sender,
                    mime_type = %notification.file.mime_type,
                    path = %path.display(),
                    "Content saved"
                );
                Outcome::Stored(path)
            }
            Err(e) => {
                error!(
                    message_id = %notification.message_id,
                    chat_id = %notification.sender.chat_id,
                    url = %notification.file.download_url,
                    error = %e,
                    "Error saving media"
                );
                Outcome::Failed(e)
            }
        }
    }

    /// Handle `raw` on its own task so the caller can move on to the next
    /// event immediately. A panic stays inside the spawned task.
    pub fn dispatch(self: &Arc<Self>, raw: Value) -> JoinHandle<Outcome> {
        let ingestor = Arc::clone(self);
        self.tasks.spawn(async move { ingestor.handle(&raw).await })
    }

    /// Number of dispatched ingestions still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched ingestion to reach its outcome.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
