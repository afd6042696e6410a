// SPDX-License-Identifier: GPL-3.0-only

//! Hash Stage (Component C, §4.C): consumes Q1, computes SHA-1 over the
//! clip, renames it to `<hex>.<ext>`, and pushes an `UploadRecord` onto Q2.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sensor_shared::models::{CaptureRecord, UploadRecord};
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::timeout;

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

pub async fn run(
    mut rx_q1: mpsc::Receiver<CaptureRecord>,
    tx_q2: mpsc::Sender<UploadRecord>,
    recording_format: String,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        let record = match timeout(DEQUEUE_TIMEOUT, rx_q1.recv()).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                log::info!("hash: Q1 closed, exiting");
                return;
            }
            Err(_) => {
                if shutdown.try_recv().is_ok() {
                    log::info!("hash: shutdown signal observed, exiting");
                    return;
                }
                continue;
            }
        };

        match hash_and_rename(&record.path, &recording_format).await {
            Ok((final_path, sha1_hex, size_bytes)) => {
                let upload_record = UploadRecord {
                    path: final_path,
                    size_bytes,
                    sha1_hex,
                    start_ts: record.start_ts,
                    end_ts: record.end_ts,
                    calibration: record.calibration,
                };
                if tx_q2.send(upload_record).await.is_err() {
                    log::error!("hash: Q2 receiver dropped, discarding hashed clip");
                }
            }
            Err(e) => {
                log::error!("hash: failed to process {}: {e}", record.path.display());
            }
        }
    }
}

/// Lowercase hex encoding of a SHA-1 digest (40 chars, §3).
fn encode_hex(digest: &[u8]) -> String {
    use std::fmt::Write;
    digest.iter().fold(String::with_capacity(digest.len() * 2), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

async fn hash_and_rename(
    path: &Path,
    ext: &str,
) -> anyhow::Result<(PathBuf, String, u64)> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let sha1_hex = encode_hex(&hasher.finalize());

    let final_path = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{sha1_hex}.{ext}"));

    // Two identical recordings hash identically; overwrite silently (§3, §8).
    fs::rename(path, &final_path).await?;
    let size_bytes = fs::metadata(&final_path).await?.len();

    Ok((final_path, sha1_hex, size_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_hex_is_lowercase_and_40_chars_for_sha1() {
        let digest = Sha1::digest(b"hello world");
        let hex = encode_hex(&digest);
        assert_eq!(hex.len(), 40);
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(hex, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[tokio::test]
    async fn hash_and_rename_produces_hex_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output0.wav");
        tokio::fs::write(&src, b"clip contents").await.unwrap();

        let (final_path, sha1_hex, size) = hash_and_rename(&src, "wav").await.unwrap();

        assert!(!src.exists());
        assert!(final_path.exists());
        assert_eq!(final_path.file_name().unwrap().to_str().unwrap(), format!("{sha1_hex}.wav"));
        assert_eq!(size, "clip contents".len() as u64);
    }

    #[tokio::test]
    async fn hash_and_rename_overwrites_existing_hashed_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output0.wav");
        tokio::fs::write(&src, b"same bytes").await.unwrap();
        let (final_path, _, _) = hash_and_rename(&src, "wav").await.unwrap();

        let src2 = dir.path().join("output1.wav");
        tokio::fs::write(&src2, b"same bytes").await.unwrap();
        let (final_path2, _, _) = hash_and_rename(&src2, "wav").await.unwrap();

        assert_eq!(final_path, final_path2);
        assert!(final_path2.exists());
    }
}
