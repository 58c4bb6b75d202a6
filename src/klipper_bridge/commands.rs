//! G-code command bridge

use crate::fault_escalation::FirmwareChannel;
use crate::pubsub::{topics, BusMessage, PubSubTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Forwards G-code lines published on the bus to the firmware, in arrival order
pub struct CommandBridge {
    transport: Arc<dyn PubSubTransport>,
    channel: Arc<dyn FirmwareChannel>,
}

impl CommandBridge {
    pub fn new(transport: Arc<dyn PubSubTransport>, channel: Arc<dyn FirmwareChannel>) -> Self {
        Self { transport, channel }
    }

    /// Subscribe to the G-code topic and start the forwarding worker
    pub fn attach(&self) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        self.transport.subscribe(
            topics::FIRMWARE_GCODE,
            Arc::new(move |message: &BusMessage| {
                let line = message.payload_str();
                if line.is_empty() {
                    return;
                }
                if tx.send(line).is_err() {
                    tracing::warn!("Command bridge worker gone, command dropped");
                }
            }),
        );

        let channel = self.channel.clone();
        tracing::info!(channel = channel.name(), "Command bridge attached");
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let channel = channel.clone();
                // One line at a time keeps the firmware seeing them in order
                let result = tokio::task::spawn_blocking(move || {
                    let outcome = channel.send_command(&line);
                    (line, outcome)
                })
                .await;
                match result {
                    Ok((_, Ok(()))) => {}
                    Ok((line, Err(e))) => {
                        tracing::error!(command = %line, error = %e, "Forwarded command failed");
                    }
                    Err(e) => tracing::error!(error = %e, "Command forwarding task failed"),
                }
            }
        })
    }
}
