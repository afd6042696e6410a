// SPDX-License-Identifier: GPL-3.0-only

//! Control Plane (Component E, §4.E): parses inbound control messages,
//! validates, mutates `SharedParameters` under lock, and raises the
//! calibration signal.

use std::sync::Arc;

use sensor_shared::bus::{
    ACKNOWLEDGEMENT_SUBTYPE, BusClient, BusMessage, MICROPHONE_CONTROL_SUBTYPE,
};
use sensor_shared::shared_params::SharedParameters;
use sensor_shared::time::truncate;
use serde_json::json;

const ACK_SEVERITY: u8 = 6;
const ACK_CONFIDENCE: u8 = 2;

pub struct ControlPlane {
    params: Arc<SharedParameters>,
    bus: Arc<dyn BusClient>,
    component_id: String,
}

impl ControlPlane {
    #[must_use]
    pub fn new(params: Arc<SharedParameters>, bus: Arc<dyn BusClient>, component_id: String) -> Self {
        Self {
            params,
            bus,
            component_id,
        }
    }

    /// Subscribe to the microphone control subtype. The provided handler
    /// dispatches each inbound message synchronously on this task's
    /// runtime via `handle_message`.
    pub async fn subscribe(self: Arc<Self>) -> anyhow::Result<()> {
        let this = Arc::clone(&self);
        self.bus
            .subscribe(
                MICROPHONE_CONTROL_SUBTYPE,
                Box::new(move |message| {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        this.handle_message(message).await;
                    });
                }),
            )
            .await
    }

    /// Handle one inbound message. No-op if it does not target this
    /// component.
    pub async fn handle_message(&self, message: BusMessage) {
        if message.target_component_id != self.component_id {
            return;
        }

        self.acknowledge(&message).await;

        match message.command.as_str() {
            "calibrate" => {
                self.params.trigger_calibration();
                log::info!("control: calibration triggered");
            }
            "duration" => self.handle_float_command(&message, CommandKind::Duration).await,
            "multiplier" => self.handle_float_command(&message, CommandKind::Multiplier).await,
            other => {
                log::warn!("control: unknown command {other:?}, ignoring");
            }
        }
    }

    async fn acknowledge(&self, message: &BusMessage) {
        let details = json!({ "command": message.command, "messageId": message.message_id });
        if let Err(e) = self
            .bus
            .send_alert(
                ACKNOWLEDGEMENT_SUBTYPE,
                ACK_SEVERITY,
                ACK_CONFIDENCE,
                "Microphone Command Acknowledgement",
                &message.command,
                details,
                vec![message.message_id.clone()],
            )
            .await
        {
            log::error!("control: failed to send acknowledgement: {e}");
        }
    }

    async fn handle_float_command(&self, message: &BusMessage, kind: CommandKind) {
        let Some(raw) = &message.value else {
            log::warn!("control: {:?} command missing a value, ignoring", kind);
            return;
        };
        let Ok(parsed) = raw.parse::<f64>() else {
            log::warn!("control: {:?} command has non-numeric value {raw:?}, ignoring", kind);
            return;
        };
        let value = truncate(parsed, 3);

        match kind {
            CommandKind::Duration => {
                if value <= 0.0 {
                    log::warn!("control: rejecting non-positive duration {value}");
                    return;
                }
                if !self.params.set_clip_duration(value) {
                    log::warn!("control: duration {value} equals current value, ignoring");
                }
            }
            CommandKind::Multiplier => {
                if value <= 0.0 {
                    log::warn!("control: rejecting non-positive multiplier {value}");
                    return;
                }
                if !self.params.set_sampling_multiplier(value) {
                    log::warn!("control: multiplier {value} equals current value, ignoring");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Duration,
    Multiplier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_shared::bus::LoggingBusClient;

    fn message(command: &str, value: Option<&str>) -> BusMessage {
        BusMessage {
            message_id: "m1".to_string(),
            message_type: "command".to_string(),
            message_subtype: MICROPHONE_CONTROL_SUBTYPE.to_string(),
            command: command.to_string(),
            value: value.map(ToString::to_string),
            target_component_id: "mic-0".to_string(),
        }
    }

    fn plane() -> ControlPlane {
        ControlPlane::new(
            Arc::new(SharedParameters::new(30.0)),
            Arc::new(LoggingBusClient),
            "mic-0".to_string(),
        )
    }

    #[tokio::test]
    async fn calibrate_sets_flag() {
        let plane = plane();
        plane.handle_message(message("calibrate", None)).await;
        assert!(plane.params.is_calibrating());
    }

    #[tokio::test]
    async fn non_positive_duration_is_rejected() {
        let plane = plane();
        let before = plane.params.clip_duration_seconds();
        plane.handle_message(message("duration", Some("0"))).await;
        assert_eq!(plane.params.clip_duration_seconds(), before);
        plane.handle_message(message("duration", Some("-5"))).await;
        assert_eq!(plane.params.clip_duration_seconds(), before);
    }

    #[tokio::test]
    async fn duration_change_marks_dirty_with_truncated_value() {
        let plane = plane();
        plane.handle_message(message("duration", Some("10.3599"))).await;
        assert_eq!(plane.params.clip_duration_seconds(), 10.359);
        assert!(plane.params.take_effective_duration_if_dirty().is_some());
    }

    #[tokio::test]
    async fn message_for_other_component_is_ignored() {
        let plane = plane();
        let mut m = message("calibrate", None);
        m.target_component_id = "mic-1".to_string();
        plane.handle_message(m).await;
        assert!(!plane.params.is_calibrating());
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let plane = plane();
        let before = plane.params.clip_duration_seconds();
        plane.handle_message(message("reboot", None)).await;
        assert_eq!(plane.params.clip_duration_seconds(), before);
    }
}
