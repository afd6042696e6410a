// SPDX-License-Identifier: GPL-3.0-only

//! Notification Emitter (Component G, §4.G): forwards successful-upload
//! records to the external bus as alerts.

use std::sync::Arc;

use sensor_shared::bus::{BusClient, STATUS_SUBTYPE};
use sensor_shared::models::{UploadDetails, UploadRecord};
use sensor_shared::time::format_timestamp;
use serde_json::json;
use tokio::sync::mpsc;

const STATUS_SEVERITY: u8 = 5;
const STATUS_CONFIDENCE: u8 = 2;

pub struct Notification {
    pub title: String,
    pub text: String,
    pub details: UploadDetails,
}

impl Notification {
    #[must_use]
    pub fn from_upload(record: &UploadRecord, room: &str, mic_num: u32) -> Self {
        let title = if record.calibration {
            "Microphone Calibration CDN Hash"
        } else {
            "Microphone CDN Hash"
        };
        let file_name = record
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            title: title.to_string(),
            text: file_name,
            details: UploadDetails {
                start_time: format_timestamp(record.start_ts),
                end_time: format_timestamp(record.end_ts),
                sha1: record.sha1_hex.clone(),
                file_size: record.size_bytes,
                room: room.to_string(),
                microphone: mic_num,
                calibration_flag: record.calibration,
            },
        }
    }
}

/// A handle the Upload Stage sends notifications through; keeps the stage
/// free of a direct bus dependency.
#[derive(Clone)]
pub struct NotifyHandle {
    tx: mpsc::Sender<Notification>,
}

impl NotifyHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, notification: Notification) {
        if self.tx.send(notification).await.is_err() {
            log::error!("notify: emitter channel closed, dropping notification");
        }
    }
}

/// Run the emitter loop: forward every queued notification to `bus` as a
/// `Status` alert until the channel closes.
pub async fn run(mut rx: mpsc::Receiver<Notification>, bus: Arc<dyn BusClient>) {
    while let Some(notification) = rx.recv().await {
        let details = json!({
            "startTime": notification.details.start_time,
            "endTime": notification.details.end_time,
            "SHA1": notification.details.sha1,
            "fileSize": notification.details.file_size,
            "Room": notification.details.room,
            "microphone": notification.details.microphone,
            "calibration_flag": notification.details.calibration_flag,
        });

        if let Err(e) = bus
            .send_alert(
                STATUS_SUBTYPE,
                STATUS_SEVERITY,
                STATUS_CONFIDENCE,
                &notification.title,
                &notification.text,
                details,
                Vec::new(),
            )
            .await
        {
            log::error!("notify: failed to send alert: {e}");
        }
    }
    log::info!("notify: channel closed, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn calibration_upload_uses_calibration_title() {
        let record = UploadRecord {
            path: PathBuf::from("/tmp/abc123.wav"),
            size_bytes: 10,
            sha1_hex: "abc123".to_string(),
            start_ts: Utc::now(),
            end_ts: Utc::now(),
            calibration: true,
        };
        let n = Notification::from_upload(&record, "Lab", 2);
        assert_eq!(n.title, "Microphone Calibration CDN Hash");
        assert_eq!(n.text, "abc123.wav");
        assert_eq!(n.details.room, "Lab");
        assert_eq!(n.details.microphone, 2);
    }

    #[test]
    fn normal_upload_uses_plain_title() {
        let record = UploadRecord {
            path: PathBuf::from("/tmp/abc123.wav"),
            size_bytes: 10,
            sha1_hex: "abc123".to_string(),
            start_ts: Utc::now(),
            end_ts: Utc::now(),
            calibration: false,
        };
        let n = Notification::from_upload(&record, "Lab", 2);
        assert_eq!(n.title, "Microphone CDN Hash");
    }
}
