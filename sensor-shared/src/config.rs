// SPDX-License-Identifier: GPL-3.0-only

//! Environment-derived agent configuration.
//!
//! Unlike the original implementation this is distilled from, nothing here
//! is kept as a module-level global: `AgentConfig` is constructed once at
//! startup and passed by value into the supervisor.

use std::path::PathBuf;

use log::warn;

/// Limits applied when validating configuration pulled from the environment.
pub mod limits {
    pub const MIN_CHANNELS: u32 = 1;
    pub const MAX_CHANNELS: u32 = 8;
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub room: String,
    pub mic_num: u32,

    pub recording_duration: f64,
    pub recording_format: String,

    pub stream_rtp_addr: String,
    pub stream_rtp_port: u16,
    pub stream_loop_addr: String,
    pub stream_loop_port: u16,
    pub stream_verbose_level: u8,
    pub stream_protocol: String,
    pub stream_acodec: String,
    pub stream_channels: u32,
    pub stream_samplerate: u32,
    pub stream_bitrate: u32,

    pub cdn_url: String,
    pub cdn_port: u16,

    pub dry_run: bool,
    pub working_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            room: "UnknownRoom".to_string(),
            mic_num: 0,
            recording_duration: 30.0,
            recording_format: "wav".to_string(),
            stream_rtp_addr: "239.255.12.42".to_string(),
            stream_rtp_port: 1234,
            stream_loop_addr: "127.0.0.1".to_string(),
            stream_loop_port: 1234,
            stream_verbose_level: 0,
            stream_protocol: "RTP".to_string(),
            stream_acodec: "MPGA".to_string(),
            stream_channels: 2,
            stream_samplerate: 44100,
            stream_bitrate: 256,
            cdn_url: "localhost".to_string(),
            cdn_port: 8080,
            dry_run: false,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn env_or_default<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{name} has an invalid value {raw:?}; falling back to default");
            default
        }),
        Err(_) => default,
    }
}

impl AgentConfig {
    /// Build configuration from environment variables, falling back to the
    /// documented defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut recording_format = std::env::var("RECORDING_FORMAT")
            .unwrap_or_else(|_| defaults.recording_format.clone())
            .to_lowercase();
        if recording_format.is_empty() {
            warn!("RECORDING_FORMAT was empty; using default wav");
            recording_format = defaults.recording_format.clone();
        }

        let stream_channels = env_or_default("STREAM_CHANNELS", defaults.stream_channels);
        let stream_channels =
            if (limits::MIN_CHANNELS..=limits::MAX_CHANNELS).contains(&stream_channels) {
                stream_channels
            } else {
                warn!(
                    "STREAM_CHANNELS={stream_channels} out of range 1..8; using default {}",
                    defaults.stream_channels
                );
                defaults.stream_channels
            };

        let recording_duration =
            env_or_default("RECORDING_DURATION", defaults.recording_duration);
        let recording_duration = if recording_duration > 0.0 {
            recording_duration
        } else {
            warn!(
                "RECORDING_DURATION={recording_duration} is not positive; using default {}",
                defaults.recording_duration
            );
            defaults.recording_duration
        };

        Self {
            room: std::env::var("ROOM").unwrap_or(defaults.room),
            mic_num: env_or_default("MIC_NUM", defaults.mic_num),
            recording_duration,
            recording_format,
            stream_rtp_addr: std::env::var("STREAM_RTP_ADDR")
                .unwrap_or(defaults.stream_rtp_addr),
            stream_rtp_port: env_or_default("STREAM_RTP_PORT", defaults.stream_rtp_port),
            stream_loop_addr: std::env::var("STREAM_LOOP_ADDR")
                .unwrap_or(defaults.stream_loop_addr),
            stream_loop_port: env_or_default("STREAM_LOOP_PORT", defaults.stream_loop_port),
            stream_verbose_level: env_or_default(
                "STREAM_VERBOSE_LEVEL",
                defaults.stream_verbose_level,
            )
            .min(3),
            stream_protocol: std::env::var("STREAM_PROTOCOL")
                .unwrap_or(defaults.stream_protocol),
            stream_acodec: std::env::var("STREAM_ACODEC").unwrap_or(defaults.stream_acodec),
            stream_channels,
            stream_samplerate: env_or_default("STREAM_SAMPLERATE", defaults.stream_samplerate),
            stream_bitrate: env_or_default("STREAM_BITRATE", defaults.stream_bitrate),
            cdn_url: std::env::var("CDNURL").unwrap_or(defaults.cdn_url),
            cdn_port: env_or_default("CDNPORT", defaults.cdn_port),
            dry_run: env_or_default("DRY_RUN", defaults.dry_run),
            working_dir: defaults.working_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = AgentConfig::default();
        assert_eq!(c.room, "UnknownRoom");
        assert_eq!(c.mic_num, 0);
        assert_eq!(c.recording_duration, 30.0);
        assert_eq!(c.stream_rtp_addr, "239.255.12.42");
        assert_eq!(c.stream_rtp_port, 1234);
        assert_eq!(c.stream_channels, 2);
        assert_eq!(c.stream_samplerate, 44100);
        assert_eq!(c.stream_bitrate, 256);
        assert!(!c.dry_run);
    }
}
