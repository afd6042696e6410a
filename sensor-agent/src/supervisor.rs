// SPDX-License-Identifier: GPL-3.0-only

//! Supervisor (Component F, §4.F): owns the queues and shared parameters,
//! spawns/joins the three stages and the control plane, performs the
//! residual-file sweep at startup, and enforces the process-count
//! invariant.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sensor_shared::cdn::CdnClient;
use sensor_shared::config::AgentConfig;
use sensor_shared::models::{AudioSettings, CaptureRecord, UploadRecord};
use sensor_shared::shared_params::SharedParameters;
use sensor_shared::time::now;
use sensor_shared::bus::{BusClient, LoggingBusClient};
use sysinfo::System;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::timeout;

use crate::capture::{self, CaptureConfig};
use crate::control::ControlPlane;
use crate::encoder::{EncoderHandle, Role};
use crate::hash;
use crate::notify::{self, NotifyHandle};
use crate::upload::{self, UploadContext};

/// Maximum number of live encoder children attributable to this agent (§5).
pub const MAX_ENCODER_INSTANCES: usize = 2;
const QUEUE_CAPACITY: usize = 64;
const STAGE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: AgentConfig,
    bus: Arc<dyn BusClient>,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            bus: Arc::new(LoggingBusClient),
        }
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn BusClient>) -> Self {
        self.bus = bus;
        self
    }

    /// Run one supervised lifetime: construct everything, residual-sweep,
    /// spawn the stages, and wait for shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        let settings = AudioSettings::from_config(&self.config);
        let params = Arc::new(SharedParameters::new(self.config.recording_duration));

        let streamer = Arc::new(Mutex::new(EncoderHandle::new(
            "streamer",
            Role::Streamer,
            "cvlc",
            self.config.working_dir.clone(),
            settings.clone(),
        )));
        let listener = Arc::new(Mutex::new(EncoderHandle::new(
            "listener",
            Role::Listener,
            "cvlc",
            self.config.working_dir.clone(),
            settings.clone(),
        )));

        let (tx_q1, rx_q1) = mpsc::channel::<CaptureRecord>(QUEUE_CAPACITY);
        let (tx_q2, rx_q2) = mpsc::channel::<UploadRecord>(QUEUE_CAPACITY);
        let (tx_notify, rx_notify) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        sweep_residuals(&self.config.working_dir, &self.config.recording_format, &tx_q1, &tx_q2)
            .await;

        let cdn = CdnClient::new(&self.config.cdn_url, self.config.cdn_port);

        let capture_handle = tokio::spawn(capture::run(
            Arc::clone(&streamer),
            Arc::clone(&listener),
            Arc::clone(&params),
            tx_q1,
            shutdown_tx.subscribe(),
            CaptureConfig {
                mic_num: self.config.mic_num,
                encoder_bin: "cvlc".to_string(),
                max_encoder_instances: MAX_ENCODER_INSTANCES,
            },
        ));

        let hash_handle = tokio::spawn(hash::run(
            rx_q1,
            tx_q2,
            self.config.recording_format.clone(),
            shutdown_tx.subscribe(),
        ));

        let upload_handle = tokio::spawn(upload::run(
            rx_q2,
            cdn,
            self.config.dry_run,
            NotifyHandle::new(tx_notify),
            UploadContext {
                room: self.config.room.clone(),
                mic_num: self.config.mic_num,
            },
            shutdown_tx.subscribe(),
        ));

        let notify_handle = tokio::spawn(notify::run(rx_notify, Arc::clone(&self.bus)));

        let control_plane = Arc::new(ControlPlane::new(
            Arc::clone(&params),
            Arc::clone(&self.bus),
            format!("microphone-{}", self.config.mic_num),
        ));
        control_plane.subscribe().await?;

        tokio::signal::ctrl_c().await?;
        log::info!("supervisor: SIGINT received, shutting down");
        let _ = shutdown_tx.send(());

        self.shutdown(&streamer, &listener).await;

        for (name, handle) in [
            ("capture", capture_handle),
            ("hash", hash_handle),
            ("upload", upload_handle),
            ("notify", notify_handle),
        ] {
            if timeout(STAGE_JOIN_TIMEOUT, handle).await.is_err() {
                log::warn!("supervisor: {name} stage did not join within 5s, abandoning");
            }
        }

        self.bus.shutdown().await?;
        Ok(())
    }

    async fn shutdown(&self, streamer: &Arc<Mutex<EncoderHandle>>, listener: &Arc<Mutex<EncoderHandle>>) {
        listener.lock().await.stop().await;
        streamer.lock().await.stop().await;
        kill_all_encoders("cvlc");
    }
}

/// Enforce the process-count invariant: if more than `max_instances`
/// encoder children are live, kill every one that is not the Streamer's,
/// relying on Capture to re-spawn the Listener on its next iteration (§4.F).
pub async fn constrain_encoders(encoder_bin: &str, streamer_pid: Option<u32>, max_instances: usize) {
    let encoder_bin = encoder_bin.to_string();
    let live = tokio::task::spawn_blocking(move || list_encoder_pids(&encoder_bin))
        .await
        .unwrap_or_default();

    if live.len() <= max_instances {
        return;
    }

    log::warn!(
        "supervisor: {} live encoder processes exceeds max {max_instances}, constraining",
        live.len()
    );
    for pid in live {
        if Some(pid) != streamer_pid {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}

fn kill_all_encoders(encoder_bin: &str) {
    for pid in list_encoder_pids(encoder_bin) {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

fn list_encoder_pids(encoder_bin: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_all();
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.name().to_string_lossy().contains(encoder_bin))
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

/// Scan the working directory for residual files left by a previous run
/// and route them directly into the pipeline, skipping the stage they've
/// already completed (§4.F.3).
async fn sweep_residuals(
    working_dir: &Path,
    ext: &str,
    tx_q1: &mpsc::Sender<CaptureRecord>,
    tx_q2: &mpsc::Sender<UploadRecord>,
) {
    let mut entries = match tokio::fs::read_dir(working_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("supervisor: failed to scan working directory for residuals: {e}");
            return;
        }
    };

    let mut found_any = false;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let suffix = format!(".{ext}");
        if !file_name.ends_with(&suffix) || file_name.contains("calibration") {
            continue;
        }

        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let end_ts = metadata
            .modified()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(|_| now());

        found_any = true;

        if file_name.starts_with("output") {
            let record = CaptureRecord {
                path: path.clone(),
                start_ts: end_ts,
                end_ts,
                calibration: false,
            };
            if tx_q1.send(record).await.is_err() {
                log::error!("supervisor: Q1 receiver dropped during residual sweep");
            }
        } else {
            let sha1_hex = file_name.trim_end_matches(&suffix).to_string();
            let record = UploadRecord {
                path: path.clone(),
                size_bytes: metadata.len(),
                sha1_hex,
                start_ts: end_ts,
                end_ts,
                calibration: false,
            };
            if tx_q2.send(record).await.is_err() {
                log::error!("supervisor: Q2 receiver dropped during residual sweep");
            }
        }
    }

    if found_any {
        log::warn!("supervisor: residual files found on startup, routed into the pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_routes_unhashed_to_q1_and_hashed_to_q2() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("output7.wav"), b"unhashed").await.unwrap();
        let hashed_name = "a".repeat(40) + ".wav";
        tokio::fs::write(dir.path().join(&hashed_name), b"hashed").await.unwrap();
        tokio::fs::write(dir.path().join("calibration_output.wav"), b"skip").await.unwrap();

        let (tx_q1, mut rx_q1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx_q2, mut rx_q2) = mpsc::channel(QUEUE_CAPACITY);

        sweep_residuals(dir.path(), "wav", &tx_q1, &tx_q2).await;
        drop(tx_q1);
        drop(tx_q2);

        let q1_items: Vec<_> = std::iter::from_fn(|| rx_q1.try_recv().ok()).collect();
        let q2_items: Vec<_> = std::iter::from_fn(|| rx_q2.try_recv().ok()).collect();

        assert_eq!(q1_items.len(), 1);
        assert_eq!(q1_items[0].path.file_name().unwrap(), "output7.wav");
        assert_eq!(q2_items.len(), 1);
        assert_eq!(q2_items[0].sha1_hex, "a".repeat(40));
    }

    #[tokio::test]
    async fn sweep_with_no_residuals_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_q1, mut rx_q1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx_q2, mut rx_q2) = mpsc::channel(QUEUE_CAPACITY);

        sweep_residuals(dir.path(), "wav", &tx_q1, &tx_q2).await;

        assert!(rx_q1.try_recv().is_err());
        assert!(rx_q2.try_recv().is_err());
    }
}
