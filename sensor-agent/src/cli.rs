// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::{ArgAction, Command, arg, command, value_parser};

#[must_use]
pub fn build() -> Command {
    command!()
        .about("🎙️ Microphone sensor agent")
        .long_about(
            "Captures audio from a locally-attached microphone, multicasts a live RTP stream, \
             records fixed-duration clips, hashes and uploads them to a CDN, and reacts to \
             command-and-control bus messages.",
        )
        .arg(
            arg!(-v --verbose ... "Enable verbose logging (-v debug, -vv trace)")
                .action(ArgAction::Count),
        )
        .arg(
            arg!(--"dry-run" "Skip network-dependent upload work regardless of environment")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"working-dir" <dir> "Override the working directory used for clips")
                .value_parser(value_parser!(PathBuf)),
        )
}
