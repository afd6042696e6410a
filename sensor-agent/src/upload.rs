// SPDX-License-Identifier: GPL-3.0-only

//! Upload Stage (Component D, §4.D): consumes Q2, uploads to the CDN,
//! verifies, and deletes on success. Network failures re-head the queue
//! via a local overflow list (§9) rather than draining and reconstructing
//! the channel, which would race with concurrent producers.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use sensor_shared::error::AgentError;
use sensor_shared::models::UploadRecord;
use sysinfo::Disks;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::notify::{Notification, NotifyHandle};

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);
/// After this many consecutive network failures the stage gives up on new
/// items for the remainder of the process lifetime (§4.D).
const MAX_CONSECUTIVE_NETWORK_FAILURES: u32 = 4;
const DISK_WARNING_PERCENT: f32 = 90.0;
const DISK_CRITICAL_PERCENT: f32 = 95.0;

pub struct UploadContext {
    pub room: String,
    pub mic_num: u32,
}

pub async fn run(
    mut rx_q2: mpsc::Receiver<UploadRecord>,
    cdn: sensor_shared::cdn::CdnClient,
    dry_run: bool,
    notify: NotifyHandle,
    context: UploadContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut overflow: VecDeque<UploadRecord> = VecDeque::new();
    let mut consecutive_network_failures = 0u32;

    loop {
        if consecutive_network_failures >= MAX_CONSECUTIVE_NETWORK_FAILURES {
            log::error!(
                "upload: {MAX_CONSECUTIVE_NETWORK_FAILURES} consecutive network failures, stage exiting (fatal)"
            );
            return;
        }

        let record = if let Some(record) = overflow.pop_front() {
            record
        } else {
            match timeout(DEQUEUE_TIMEOUT, rx_q2.recv()).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    log::info!("upload: Q2 closed, exiting");
                    return;
                }
                Err(_) => {
                    if shutdown.try_recv().is_ok() {
                        log::info!("upload: shutdown signal observed, exiting");
                        return;
                    }
                    continue;
                }
            }
        };

        if dry_run {
            if let Err(e) = tokio::fs::remove_file(&record.path).await {
                log::warn!("upload: dry-run delete failed for {}: {e}", record.path.display());
            }
            continue;
        }

        match process_one(&cdn, &record).await {
            Ok(UploadOutcome::Verified) => {
                consecutive_network_failures = 0;
                notify
                    .send(Notification::from_upload(&record, &context.room, context.mic_num))
                    .await;
            }
            Ok(UploadOutcome::Dropped) => {
                consecutive_network_failures = 0;
                // Protocol mismatch: the server has a different view, further retry is futile (§4.D.3).
            }
            Ok(UploadOutcome::RetryStatus) => {
                // Non-2xx verify status: not a connectivity failure, so it does not
                // count against the consecutive-network-failure budget, but the file
                // stays and the record is the first one re-attempted next cycle (§8).
                overflow.push_front(record);
            }
            Err(AgentError::Transient(reason)) => {
                consecutive_network_failures += 1;
                log::warn!(
                    "upload: transient failure ({consecutive_network_failures}/{MAX_CONSECUTIVE_NETWORK_FAILURES}) for {}: {reason}",
                    record.path.display()
                );
                overflow.push_front(record);
            }
            Err(e) => {
                log::error!("upload: unexpected error for {}: {e}", record.path.display());
            }
        }
    }
}

enum UploadOutcome {
    Verified,
    /// SHA mismatch: dropped, never retried.
    Dropped,
    /// Non-2xx verify response: file kept, re-headed for the next cycle.
    RetryStatus,
}

async fn process_one(
    cdn: &sensor_shared::cdn::CdnClient,
    record: &UploadRecord,
) -> Result<UploadOutcome, AgentError> {
    let reported_id = cdn.upload(&record.path).await?;

    if reported_id != record.sha1_hex {
        log::error!(
            "upload: SHA mismatch for {}: local={} server={}",
            record.path.display(),
            record.sha1_hex,
            reported_id
        );
        return Ok(UploadOutcome::Dropped);
    }

    let status = cdn.verify(&reported_id).await?;
    if status == StatusCode::OK {
        if let Err(e) = tokio::fs::remove_file(&record.path).await {
            log::warn!("upload: delete failed after successful verify for {}: {e}", record.path.display());
        }
        Ok(UploadOutcome::Verified)
    } else {
        log::warn!(
            "upload: verify returned {status} for {}, leaving file in place",
            record.path.display()
        );
        warn_on_disk_usage(&record.path);
        Ok(UploadOutcome::RetryStatus)
    }
}

fn warn_on_disk_usage(path: &Path) {
    let disks = Disks::new_with_refreshed_list();
    let Some(disk) = disks.iter().find(|d| path.starts_with(d.mount_point())) else {
        return;
    };
    let total = disk.total_space();
    if total == 0 {
        return;
    }
    let used_percent = 100.0 - (disk.available_space() as f32 / total as f32) * 100.0;
    if used_percent > DISK_CRITICAL_PERCENT {
        log::error!("upload: disk usage critical ({used_percent:.1}%) on {}", disk.mount_point().display());
    } else if used_percent > DISK_WARNING_PERCENT {
        log::warn!("upload: disk usage high ({used_percent:.1}%) on {}", disk.mount_point().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_head_of_queue() {
        let mut overflow: VecDeque<u32> = VecDeque::new();
        overflow.push_front(3);
        overflow.push_front(2);
        overflow.push_front(1);
        assert_eq!(overflow.pop_front(), Some(1));
        assert_eq!(overflow.pop_front(), Some(2));
        assert_eq!(overflow.pop_front(), Some(3));
    }
}
