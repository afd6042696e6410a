// SPDX-License-Identifier: GPL-3.0-only

//! Entry point and top-level restart loop.
//!
//! A non-interrupt error restarts the Supervisor; `SIGINT` (observed inside
//! `Supervisor::run`) exits cleanly with status 0 (§4.F, §6).

use std::path::PathBuf;

use log::{error, info, warn};
use sensor_shared::config::AgentConfig;

use crate::cli;
use crate::supervisor::Supervisor;

/// Main entry point for the agent.
///
/// # Errors
///
/// Returns an error if the required encoder dependency cannot be found, in
/// which case the process should exit with code 2 (§6).
pub async fn run() -> anyhow::Result<()> {
    let matches = cli::build().get_matches();

    let verbosity = matches.get_count("verbose");
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    } else {
        let level = match verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }

    let mut config = AgentConfig::from_env();
    if matches.get_flag("dry-run") {
        config.dry_run = true;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("working-dir") {
        config.working_dir = dir.clone();
    }

    if which_encoder().is_none() {
        error!("required external encoder dependency not found on PATH");
        std::process::exit(2);
    }

    info!("starting microphone sensor agent");
    info!("room: {}", config.room);
    info!("mic: {}", config.mic_num);
    info!("recording duration: {}s", config.recording_duration);
    info!("recording format: {}", config.recording_format);
    info!("dry run: {}", config.dry_run);

    loop {
        let supervisor = Supervisor::new(config.clone());
        match supervisor.run().await {
            Ok(()) => {
                info!("supervisor exited cleanly, shutting down");
                return Ok(());
            }
            Err(e) => {
                warn!("supervisor exited with error, restarting: {e}");
            }
        }
    }
}

/// Locate the external encoder binary on `PATH`. This agent assumes a
/// VLC-compatible transcoder (`cvlc`) is installed; see §6.
fn which_encoder() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join("cvlc"))
        .find(|candidate| candidate.is_file())
}
