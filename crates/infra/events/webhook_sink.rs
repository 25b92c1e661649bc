use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::channel_bridge::EventSink;
use crate::domain::value_objects::engine_events::EngineEvent;

/// Posts engine events as JSON to the external formatting/dispatch service.
pub struct WebhookEventSink {
    webhook_url: Url,
    client: Client,
}

impl WebhookEventSink {
    pub fn new(webhook_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn deliver(&self, event: &EngineEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({
                "event_type": event.event_type.as_str(),
                "payload": event.payload,
                "emitted_at": event.emitted_at,
            }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "event webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn sink_name(&self) -> &'static str {
        "webhook"
    }
}

// Webhook URLs may embed credentials; never echo the URL in errors.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("event webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("event webhook connection failed");
    }
    anyhow!("event webhook request failed")
}
