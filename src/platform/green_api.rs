use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::GreenApiConfig;
use crate::error::ApiError;
use crate::ingest::Ingestor;

/// One queued notification as returned by `receiveNotification`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedNotification {
    pub receipt_id: u64,
    #[serde(default)]
    pub body: Value,
}

pub struct GreenApiClient {
    client: reqwest::Client,
    config: GreenApiConfig,
}

impl GreenApiClient {
    pub fn new(client: reqwest::Client, config: GreenApiConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &GreenApiConfig {
        &self.config
    }

    /// `{base}/waInstance{id}/{method}/{token}`
    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/waInstance{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.instance_id,
            method,
            self.config.api_token
        )
    }

    /// Next queued notification, or `None` when the queue stayed empty for
    /// the receive timeout.
    pub async fn receive_notification(&self) -> Result<Option<ReceivedNotification>> {
        let url = self.method_url("receiveNotification");
        let response = self
            .client
            .get(&url)
            .query(&[("receiveTimeout", self.config.receive_timeout_secs)])
            .timeout(Duration::from_secs(self.config.receive_timeout_secs + 10))
            .send()
            .await
            .context("Failed to send receiveNotification request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("receiveNotification returned {}", status);
        }

        response
            .json::<Option<ReceivedNotification>>()
            .await
            .context("Failed to parse receiveNotification response")
    }

    /// Acknowledge a notification so it is not delivered again.
    pub async fn delete_notification(&self, receipt_id: u64) -> Result<()> {
        let url = format!("{}/{}", self.method_url("deleteNotification"), receipt_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send deleteNotification request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("deleteNotification({}) returned {}", receipt_id, status);
        }
        Ok(())
    }

    pub async fn get_contacts(&self) -> std::result::Result<Value, ApiError> {
        let response = self
            .client
            .get(self.method_url("getContacts"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        Ok(response.json().await?)
    }
}

/// Receive loop: hand every notification to the ingestor on its own task,
/// then acknowledge it. Runs until the surrounding task is dropped.
pub async fn run(client: Arc<GreenApiClient>, ingestor: Arc<Ingestor>) -> Result<()> {
    let backoff = Duration::from_secs(client.config().poll_interval_secs);

    info!("Starting Green API receive loop...");

    loop {
        match client.receive_notification().await {
            Ok(Some(notification)) => {
                debug!("Received notification {}", notification.receipt_id);
                // Outcome is logged inside the task.
                drop(ingestor.dispatch(notification.body));

                if let Err(e) = client.delete_notification(notification.receipt_id).await {
                    warn!("{:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Polling failed: {:#}", e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
