//! LocalBus - in-process pub/sub transport
//!
//! Publishing enqueues onto an unbounded channel; a single dispatcher task
//! delivers messages to handlers, so a handler may publish without re-entering
//! the bus.

use super::{BusMessage, MessageHandler, PubSubTransport};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

type HandlerTable = Arc<RwLock<HashMap<String, Vec<MessageHandler>>>>;

/// In-process transport
pub struct LocalBus {
    handlers: HandlerTable,
    connected: AtomicBool,
    tx: mpsc::UnboundedSender<BusMessage>,
    published: AtomicU64,
}

impl LocalBus {
    /// Create the bus and spawn its dispatcher on the current runtime
    pub fn start() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BusMessage>();
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));

        let dispatch_handlers = handlers.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let targets: Vec<MessageHandler> = dispatch_handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&message.topic)
                    .cloned()
                    .unwrap_or_default();

                if targets.is_empty() {
                    tracing::trace!(topic = %message.topic, "No subscribers for message");
                }

                for handler in targets {
                    handler(&message);
                }
            }
            tracing::debug!("LocalBus dispatcher stopped");
        });

        tracing::info!("LocalBus started");

        Arc::new(Self {
            handlers,
            connected: AtomicBool::new(true),
            tx,
            published: AtomicU64::new(0),
        })
    }

    /// Simulate broker connection loss / recovery
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            if connected {
                tracing::info!("LocalBus reconnected");
            } else {
                tracing::warn!("LocalBus disconnected");
            }
        }
    }

    /// Number of messages accepted for delivery
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of handlers registered on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl PubSubTransport for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "not connected, cannot publish to {}",
                topic
            )));
        }

        self.tx
            .send(BusMessage::new(topic, payload))
            .map_err(|_| Error::Transport("dispatcher stopped".to_string()))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        tracing::debug!(topic = %topic, "Subscribed");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_loopback(&self) -> bool {
        true
    }
}
