// SPDX-License-Identifier: GPL-3.0-only

//! Data model shared by the capture, hash, upload and control-plane stages.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

/// Immutable settings used to render an encoder command line.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub input_mrl: String,
    pub loopback_mrl: String,
    pub codec: String,
    pub channels: u32,
    pub samplerate: u32,
    pub bitrate: u32,
    pub protocol: String,
    pub verbose_level: u8,
    pub format: String,
    pub rtp_addr: String,
    pub rtp_port: u16,
    pub loop_addr: String,
    pub loop_port: u16,
}

impl AudioSettings {
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            input_mrl: format!("dshow://input{}", config.mic_num),
            loopback_mrl: format!(
                "rtp://@{}:{}",
                config.stream_loop_addr, config.stream_loop_port
            ),
            codec: config.stream_acodec.clone(),
            channels: config.stream_channels,
            samplerate: config.stream_samplerate,
            bitrate: config.stream_bitrate,
            protocol: config.stream_protocol.clone(),
            verbose_level: config.stream_verbose_level,
            format: config.recording_format.clone(),
            rtp_addr: config.stream_rtp_addr.clone(),
            rtp_port: config.stream_rtp_port,
            loop_addr: config.stream_loop_addr.clone(),
            loop_port: config.stream_loop_port,
        }
    }

    /// `-q` at verbosity 0, else one `-v` per level up to `-vvv`.
    #[must_use]
    pub fn verbosity_flag(&self) -> String {
        if self.verbose_level == 0 {
            "-q".to_string()
        } else {
            format!("-{}", "v".repeat(self.verbose_level.min(3) as usize))
        }
    }
}

/// A single clip captured and enqueued by the Capture Stage.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub path: PathBuf,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub calibration: bool,
}

/// A renamed, hashed clip enqueued by the Hash Stage for upload.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha1_hex: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub calibration: bool,
}

/// A parsed control-plane command targeting this component.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub command: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Details payload carried on a successful-upload notification (§4.G).
#[derive(Debug, Clone, Serialize)]
pub struct UploadDetails {
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    #[serde(rename = "SHA1")]
    pub sha1: String,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    #[serde(rename = "Room")]
    pub room: String,
    pub microphone: u32,
    pub calibration_flag: bool,
}
