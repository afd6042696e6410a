// SPDX-License-Identifier: GPL-3.0-only

//! Abstraction over the command-and-control transport this agent consumes.
//!
//! The transport's own subscription/heartbeat/acknowledgement machinery is
//! an external collaborator (§1) — this crate only needs `subscribe` and
//! `send_alert`. `LoggingBusClient` stands in for the real transport in
//! tests and in environments without one configured.

use async_trait::async_trait;
use serde_json::Value;

/// Control-message subtype this agent subscribes to.
pub const MICROPHONE_CONTROL_SUBTYPE: &str = "MicrophoneControl";

/// Alert subtype emitted for a successful upload notification.
pub const STATUS_SUBTYPE: &str = "Status";
/// Alert subtype emitted for a command acknowledgement.
pub const ACKNOWLEDGEMENT_SUBTYPE: &str = "Acknowledgement";

/// A single inbound control message delivered to a subscription handler.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub message_id: String,
    pub message_type: String,
    pub message_subtype: String,
    pub command: String,
    pub value: Option<String>,
    pub target_component_id: String,
}

/// The C2 transport's consumed interface (§4.H, §6).
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Register `handler` for every message whose subtype matches `subtype`.
    async fn subscribe(
        &self,
        subtype: &str,
        handler: Box<dyn Fn(BusMessage) + Send + Sync>,
    ) -> anyhow::Result<()>;

    /// Emit an alert onto the bus.
    #[allow(clippy::too_many_arguments)]
    async fn send_alert(
        &self,
        subtype: &str,
        severity: u8,
        confidence: u8,
        title: &str,
        text: &str,
        details: Value,
        refs: Vec<String>,
    ) -> anyhow::Result<()>;

    /// Release any resources held by the transport (connections, threads).
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// A logging-only stand-in for the real C2 transport. Never fails.
#[derive(Debug, Default)]
pub struct LoggingBusClient;

#[async_trait]
impl BusClient for LoggingBusClient {
    async fn subscribe(
        &self,
        subtype: &str,
        _handler: Box<dyn Fn(BusMessage) + Send + Sync>,
    ) -> anyhow::Result<()> {
        log::info!("bus: subscribed to subtype {subtype}");
        Ok(())
    }

    async fn send_alert(
        &self,
        subtype: &str,
        severity: u8,
        confidence: u8,
        title: &str,
        text: &str,
        details: Value,
        refs: Vec<String>,
    ) -> anyhow::Result<()> {
        log::info!(
            "bus alert [{subtype}] sev={severity} conf={confidence} title={title:?} text={text:?} details={details} refs={refs:?}"
        );
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        log::info!("bus: shutdown");
        Ok(())
    }
}
