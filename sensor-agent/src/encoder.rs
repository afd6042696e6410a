// SPDX-License-Identifier: GPL-3.0-only

//! Wraps a single external encoder subprocess (Component A, §4.A).
//!
//! Prefers a direct exec (argument vector, no shell) so the returned child
//! id is the encoder's own id. The shell/PID-successor disambiguation path
//! exists for encoders that can only be driven through a shell wrapper
//! (§9): once spawned, the handle resolves the real encoder pid from the
//! OS process table before any `stop()` is accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sensor_shared::AgentError;
use sensor_shared::models::AudioSettings;
use sysinfo::System;
use tokio::process::{Child, Command};
use tokio::time::sleep;

/// How many successor pids to consider when the encoder was launched
/// through an intermediate shell (parent, parent+1, parent+2).
const PID_SUCCESSOR_SPREAD: u32 = 2;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STOP_POLL_TICKS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Streamer,
    Listener,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Stopped,
    Streaming,
    Recording,
}

pub struct EncoderHandle {
    name: String,
    role: Role,
    encoder_bin: String,
    working_dir: PathBuf,
    settings: AudioSettings,
    child: Option<Child>,
    pid: Option<u32>,
    state: EncoderState,
    current_clip: Option<PathBuf>,
}

impl EncoderHandle {
    #[must_use]
    pub fn new(name: &str, role: Role, encoder_bin: &str, working_dir: PathBuf, settings: AudioSettings) -> Self {
        Self {
            name: name.to_string(),
            role,
            encoder_bin: encoder_bin.to_string(),
            working_dir,
            settings,
            child: None,
            pid: None,
            state: EncoderState::Stopped,
            current_clip: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Spawn the encoder with `args` (no shell). Fails with
    /// `AlreadyRunning` if a child is already tracked.
    pub async fn start(&mut self, args: &[String]) -> Result<(), AgentError> {
        if self.state != EncoderState::Stopped {
            return Err(AgentError::EncoderAlreadyRunning);
        }

        let mut command = Command::new(&self.encoder_bin);
        command
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let child = command.spawn().map_err(AgentError::from)?;
        let spawned_pid = child.id();

        self.child = Some(child);
        self.state = match self.role {
            Role::Streamer => EncoderState::Streaming,
            Role::Listener => EncoderState::Recording,
        };
        log::info!("{} encoder started ({})", self.name, self.role_label());

        // Resolve the real encoder pid before any stop() is accepted, even
        // when spawned_pid already is the encoder (direct-exec path is a no-op).
        self.pid = self.disambiguate_pid(spawned_pid);
        Ok(())
    }

    fn role_label(&self) -> &'static str {
        match self.role {
            Role::Streamer => "streaming",
            Role::Listener => "recording",
        }
    }

    /// Resolve the true encoder pid from the OS process table, matching the
    /// encoder's basename among `shell_pid`, `shell_pid+1` and `shell_pid+2`
    /// (the original's shell/fork successor heuristic, §9). Falls back to
    /// `shell_pid` itself if no better match is found or `shell_pid` is
    /// `None`.
    fn disambiguate_pid(&self, shell_pid: Option<u32>) -> Option<u32> {
        let Some(shell_pid) = shell_pid else {
            return None;
        };

        let mut system = System::new();
        system.refresh_all();

        let candidates: Vec<u32> = (0..=PID_SUCCESSOR_SPREAD)
            .map(|delta| shell_pid + delta)
            .collect();

        for candidate in &candidates {
            if let Some(process) = system.process(sysinfo::Pid::from_u32(*candidate))
                && process
                    .name()
                    .to_string_lossy()
                    .contains(self.encoder_bin.as_str())
            {
                return Some(*candidate);
            }
        }

        Some(shell_pid)
    }

    /// Refresh and return liveness without blocking. Emits a log event on a
    /// Stopped <-> Running state transition.
    pub fn is_running(&mut self) -> bool {
        let was_running = self.state != EncoderState::Stopped;

        let still_alive = match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };

        if was_running && !still_alive {
            log::info!("{} encoder exited on its own", self.name);
            self.state = EncoderState::Stopped;
            self.child = None;
            self.pid = None;
        }

        still_alive
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        if self.state == EncoderState::Stopped {
            None
        } else {
            self.pid
        }
    }

    /// Issue a terminate signal, escalating to kill after ~1 s if the child
    /// is still alive. Safe to call when already stopped.
    pub async fn stop(&mut self) {
        let Some(pid) = self.pid else {
            self.state = EncoderState::Stopped;
            self.child = None;
            return;
        };

        let nix_pid = Pid::from_raw(pid as i32);
        if process_exists(nix_pid) {
            let _ = signal::kill(nix_pid, Signal::SIGTERM);

            let mut alive = true;
            for _ in 0..STOP_POLL_TICKS {
                sleep(STOP_POLL_INTERVAL).await;
                if !process_exists(nix_pid) {
                    alive = false;
                    break;
                }
            }

            if alive && process_exists(nix_pid) {
                log::warn!("{} encoder did not exit on SIGTERM, escalating to SIGKILL", self.name);
                let _ = signal::kill(nix_pid, Signal::SIGKILL);
            }
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        self.state = EncoderState::Stopped;
        self.pid = None;
        log::info!("{} encoder stopped", self.name);
    }

    /// Listener-only: allocate the next temp clip path, `output<N>.<ext>`
    /// for the smallest non-negative `N` not already present on disk.
    #[must_use]
    pub fn next_clip_path(&mut self) -> PathBuf {
        debug_assert_eq!(self.role, Role::Listener);
        let ext = &self.settings.format;
        let mut n = 0u64;
        loop {
            let candidate = self.working_dir.join(format!("output{n}.{ext}"));
            if !candidate.exists() {
                self.current_clip = Some(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }

    #[must_use]
    pub fn current_clip_path(&self) -> Option<&Path> {
        self.current_clip.as_deref()
    }

    pub fn clear_current_clip(&mut self) {
        self.current_clip = None;
    }

    #[must_use]
    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }
}

fn process_exists(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Render the Streamer's argument vector: read `input_mrl`, transcode, and
/// duplicate to the RTP multicast sink and the loopback sink (§6).
#[must_use]
pub fn render_streamer_args(settings: &AudioSettings, mic_num: u32) -> Vec<String> {
    let stream_name = format!("YetiAudioStreamer_{mic_num}");
    let loopback_name = format!("loopback_{mic_num}");
    let sout = format!(
        "#transcode{{acodec={},ab={},aenc=ffmpeg,channels={},samplerate={},threads=2}}:duplicate{{dst=rtp{{mux=ts,dst={},port={},sdp=sap,name='{stream_name}'}},dst=rtp{{mux=ts,dst={},port={},sdp=sap,name='{loopback_name}'}}}}",
        settings.codec,
        settings.bitrate,
        settings.channels,
        settings.samplerate,
        settings.rtp_addr,
        settings.rtp_port,
        settings.loop_addr,
        settings.loop_port,
    );

    vec![
        settings.verbosity_flag(),
        "--no-sout-video".to_string(),
        "--sout-audio".to_string(),
        "--ttl=1".to_string(),
        "--sout-keep".to_string(),
        "--sout".to_string(),
        sout,
        settings.input_mrl.clone(),
    ]
}

/// Render the Listener's argument vector: read the loopback RTP url,
/// transcode, and write to `clip_path` in the configured container format.
#[must_use]
pub fn render_listener_args(settings: &AudioSettings, clip_path: &Path) -> Vec<String> {
    let sout = format!(
        "#transcode{{acodec={},ab={},aenc=ffmpeg,channels={},samplerate={},threads=2}}:std{{access=file,mux={},dst={}}}",
        settings.codec,
        settings.bitrate,
        settings.channels,
        settings.samplerate,
        settings.format,
        clip_path.display(),
    );

    vec![
        settings.verbosity_flag(),
        "--no-sout-video".to_string(),
        "--sout-audio".to_string(),
        "--ttl=1".to_string(),
        "--sout-keep".to_string(),
        "--sout".to_string(),
        sout,
        settings.loopback_mrl.clone(),
        "vlc://quit".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_shared::AgentConfig;

    fn settings() -> AudioSettings {
        AudioSettings::from_config(&AgentConfig::default())
    }

    #[test]
    fn streamer_args_carry_both_sinks() {
        let args = render_streamer_args(&settings(), 3);
        let sout = args.iter().find(|a| a.contains("duplicate")).unwrap();
        assert!(sout.contains("YetiAudioStreamer_3"));
        assert!(sout.contains("loopback_3"));
        assert!(sout.contains("239.255.12.42"));
        assert!(sout.contains("127.0.0.1"));
    }

    #[test]
    fn listener_args_target_clip_path_and_quit() {
        let clip = PathBuf::from("/tmp/output0.wav");
        let args = render_listener_args(&settings(), &clip);
        assert_eq!(args.last().unwrap(), "vlc://quit");
        let sout = args.iter().find(|a| a.contains("std{")).unwrap();
        assert!(sout.contains("/tmp/output0.wav"));
        assert!(sout.contains("mux=wav"));
    }

    #[test]
    fn verbosity_flag_matches_level() {
        let mut s = settings();
        s.verbose_level = 0;
        assert_eq!(s.verbosity_flag(), "-q");
        s.verbose_level = 2;
        assert_eq!(s.verbosity_flag(), "-vv");
    }

    #[test]
    fn next_clip_path_finds_smallest_unused_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("output0.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("output1.wav"), b"x").unwrap();

        let mut handle = EncoderHandle::new(
            "listener",
            Role::Listener,
            "cvlc",
            dir.path().to_path_buf(),
            settings(),
        );
        let path = handle.next_clip_path();
        assert_eq!(path, dir.path().join("output2.wav"));
        assert_eq!(handle.current_clip_path(), Some(path.as_path()));
    }
}
