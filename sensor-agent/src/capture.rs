// SPDX-License-Identifier: GPL-3.0-only

//! Capture Stage (Component B, §4.B): drives the Streamer once and the
//! Listener in a loop of fixed-duration segments, enqueuing a
//! `CaptureRecord` per completed clip onto Q1.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sensor_shared::models::CaptureRecord;
use sensor_shared::shared_params::{CALIBRATION_DURATION_SECONDS, SharedParameters};
use sensor_shared::time::now;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::sleep;

use crate::encoder::{EncoderHandle, render_listener_args, render_streamer_args};
use crate::supervisor::constrain_encoders;

const SEGMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STREAMER_STABILIZE: Duration = Duration::from_secs(3);

pub struct CaptureConfig {
    pub mic_num: u32,
    pub encoder_bin: String,
    pub max_encoder_instances: usize,
}

/// Run the capture loop until `shutdown` fires. Owns no encoder state
/// directly — `streamer`/`listener` are shared with the Supervisor so it
/// can stop them and enforce the process-count invariant independently.
pub async fn run(
    streamer: Arc<Mutex<EncoderHandle>>,
    listener: Arc<Mutex<EncoderHandle>>,
    params: Arc<SharedParameters>,
    tx_q1: mpsc::Sender<CaptureRecord>,
    mut shutdown: broadcast::Receiver<()>,
    config: CaptureConfig,
) {
    {
        let mut streamer = streamer.lock().await;
        let args = render_streamer_args(streamer.settings(), config.mic_num);
        if let Err(e) = streamer.start(&args).await {
            log::error!("capture: failed to start streamer: {e}");
        }
    }
    sleep(STREAMER_STABILIZE).await;

    loop {
        if shutdown.try_recv().is_ok() {
            log::info!("capture: shutdown signal observed, exiting loop");
            return;
        }

        let mut calibrating = false;
        let mut segment_duration = params.effective_duration();
        if let Some(duration) = params.take_effective_duration_if_dirty() {
            segment_duration = duration;
        }
        if params.is_calibrating() {
            calibrating = true;
            segment_duration = CALIBRATION_DURATION_SECONDS;
        }

        let start_ts = now();
        let clip_path = {
            let mut listener = listener.lock().await;
            let path = listener.next_clip_path();
            let args = render_listener_args(listener.settings(), &path);
            if let Err(e) = listener.start(&args).await {
                log::error!("capture: failed to start listener: {e}");
            }
            path
        };

        run_segment(segment_duration, &mut shutdown).await;

        {
            let mut listener = listener.lock().await;
            listener.stop().await;
        }
        let end_ts = now();

        enqueue_if_present(&clip_path, start_ts, end_ts, calibrating, &tx_q1).await;

        {
            let mut listener = listener.lock().await;
            listener.clear_current_clip();
        }

        if calibrating {
            params.clear_calibration();
        }

        let streamer_pid = streamer.lock().await.pid();
        constrain_encoders(&config.encoder_bin, streamer_pid, config.max_encoder_instances).await;
    }
}

/// Sleep in ~100 ms increments until `duration_secs` elapses or shutdown
/// fires, whichever comes first.
async fn run_segment(duration_secs: f64, shutdown: &mut broadcast::Receiver<()>) {
    let target = Duration::from_secs_f64(duration_secs.max(0.0));
    let mut elapsed = Duration::ZERO;
    while elapsed < target {
        if shutdown.try_recv().is_ok() {
            return;
        }
        let tick = SEGMENT_POLL_INTERVAL.min(target - elapsed);
        sleep(tick).await;
        elapsed += tick;
    }
}

async fn enqueue_if_present(
    clip_path: &PathBuf,
    start_ts: chrono::DateTime<chrono::Utc>,
    end_ts: chrono::DateTime<chrono::Utc>,
    calibration: bool,
    tx_q1: &mpsc::Sender<CaptureRecord>,
) {
    if !clip_path.exists() {
        log::warn!(
            "capture: expected clip {} missing, skipping segment",
            clip_path.display()
        );
        return;
    }

    let record = CaptureRecord {
        path: clip_path.clone(),
        start_ts,
        end_ts,
        calibration,
    };
    if tx_q1.send(record).await.is_err() {
        log::error!("capture: Q1 receiver dropped, discarding completed clip");
    }
}
