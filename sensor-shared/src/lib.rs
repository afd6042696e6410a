// SPDX-License-Identifier: GPL-3.0-only

//! Shared types, configuration and external-collaborator clients for the
//! microphone sensor agent: everything the capture/hash/upload/control
//! stages in `sensor-agent` need that does not itself belong to one stage.

pub mod bus;
pub mod cdn;
pub mod config;
pub mod error;
pub mod models;
pub mod shared_params;
pub mod time;

pub use config::AgentConfig;
pub use error::AgentError;
pub use shared_params::SharedParameters;
