//! Error types for the swarm engine.

use crate::device_api::ProbeError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input is neither a dotted-quad IP nor a bare hostname.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("a device at {0} is already part of the swarm")]
    Duplicate(String),

    /// The probe reached something that behaves like a protected miner
    /// endpoint (HTTP 401 or an opaque transport failure).
    #[error("device at {0} must be upgraded to a newer firmware before it can be added")]
    NeedsFirmwareUpgrade(String),

    #[error("no miner answered at {address}: {source}")]
    NotAMiner {
        address: String,
        #[source]
        source: ProbeError,
    },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The subnet to scan could not be determined; the pass is abandoned.
    #[error("unable to determine the network to scan: {0}")]
    ScanTarget(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("engine is not running")]
    EngineStopped,

    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
