use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::domain::{
    repositories::event_bridge::EventBridge, value_objects::engine_events::EngineEvent,
};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &EngineEvent) -> Result<()>;
    fn sink_name(&self) -> &'static str;
}

/// Event bridge backed by a bounded channel. `emit` never waits: a full queue drops the event.
#[derive(Clone)]
pub struct ChannelEventBridge {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelEventBridge {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EngineEvent>(capacity.max(1));

        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(error) = sink.deliver(&event).await {
                        warn!(
                            sink = sink.sink_name(),
                            event_type = event.event_type.as_str(),
                            error = %error,
                            "event_bridge: sink delivery failed"
                        );
                    }
                }
            }
            debug!("event_bridge: channel closed, dispatcher exiting");
        });

        (Self { tx }, dispatcher)
    }
}

impl EventBridge for ChannelEventBridge {
    fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    "event_bridge: queue full; dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    "event_bridge: queue closed; dropping event"
                );
            }
        }
    }
}

/// Sink that only logs; used when no webhook is configured.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn deliver(&self, event: &EngineEvent) -> Result<()> {
        debug!(
            event_type = event.event_type.as_str(),
            payload = %event.payload,
            "event_bridge: event emitted"
        );
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::engine_events::EngineEventType;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct RecordingSink {
        seen: Mutex<Vec<EngineEventType>>,
        notify: Notify,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: &EngineEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.event_type);
            self.notify.notify_one();
            Ok(())
        }

        fn sink_name(&self) -> &'static str {
            "recording"
        }
    }

    struct BlockedSink {
        release: Notify,
    }

    #[async_trait]
    impl EventSink for BlockedSink {
        async fn deliver(&self, _event: &EngineEvent) -> Result<()> {
            self.release.notified().await;
            Ok(())
        }

        fn sink_name(&self) -> &'static str {
            "blocked"
        }
    }

    #[tokio::test]
    async fn delivers_emitted_events_to_sinks() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            notify: Notify::new(),
        });
        let (bridge, _dispatcher) = ChannelEventBridge::new(vec![sink.clone() as Arc<dyn EventSink>], 8);

        bridge.emit(EngineEvent::new(EngineEventType::RecordingStarted, json!({})));
        sink.notify.notified().await;

        assert_eq!(
            sink.seen.lock().unwrap().as_slice(),
            &[EngineEventType::RecordingStarted]
        );
    }

    #[tokio::test]
    async fn emit_does_not_wait_for_a_stalled_sink() {
        let sink = Arc::new(BlockedSink {
            release: Notify::new(),
        });
        let (bridge, _dispatcher) = ChannelEventBridge::new(vec![sink.clone() as Arc<dyn EventSink>], 1);

        // The first event occupies the sink, the second fills the queue, the rest are dropped.
        for _ in 0..16 {
            bridge.emit(EngineEvent::new(EngineEventType::TaskProgress, json!({})));
        }

        sink.release.notify_waiters();
    }
}
