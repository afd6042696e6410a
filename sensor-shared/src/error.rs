// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error kinds produced by the sensor pipeline.
///
/// Only `Fatal` ever propagates out of a stage's run loop; every other
/// variant is caught at the point it is produced, logged, and the stage
/// continues with its next item.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("CDN reported id {reported} for upload of local hash {expected}")]
    ProtocolMismatch { expected: String, reported: String },

    #[error("expected artifact missing: {0}")]
    MissingArtifact(String),

    #[error("encoder already running")]
    EncoderAlreadyRunning,

    #[error("encoder child lost")]
    EncoderChildLost,

    #[error("rejected control command: {0}")]
    BadCommand(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Fatal(_))
    }
}
