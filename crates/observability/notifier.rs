use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;

#[derive(Clone, Debug)]
pub(crate) struct AlertSpan {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, String>,
}

/// A log event at or above the alert threshold, flattened for delivery.
#[derive(Clone, Debug)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<AlertSpan>,
}

#[async_trait]
pub(crate) trait AlertProvider: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<()>;
    fn provider_name(&self) -> &'static str;
}

#[derive(Clone)]
pub(crate) struct AlertNotifier {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertNotifier {
    pub(crate) fn new(providers: Vec<Arc<dyn AlertProvider>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(256);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for provider in &providers {
                    // Logging here would re-enter the alert layer; report on stderr instead.
                    if let Err(error) = provider.send(&event).await {
                        eprintln!(
                            "alert provider {} failed: {error}",
                            provider.provider_name()
                        );
                    }
                }
            }
        });

        Self { tx }
    }

    /// Drops the alert when the queue is full or closed; alerts never block logging.
    pub(crate) fn try_notify(&self, event: AlertEvent) {
        if self.tx.try_send(event).is_err() {
            eprintln!("alert queue unavailable; dropping alert");
        }
    }
}
