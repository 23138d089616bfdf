//! Command types sent from API handlers to the swarm engine.
//!
//! Each command carries a oneshot reply channel so the handler can
//! await the result and translate it into an HTTP response.

use tokio::sync::oneshot;

use crate::api_client::types::SettingsPatch;
use crate::device::Device;
use crate::error::Result;

pub enum SwarmCommand {
    /// Start a discovery pass. Replies whether one was started; a pass
    /// already running makes this a no-op.
    Scan { reply: oneshot::Sender<Result<bool>> },

    /// Refresh every registered device now instead of waiting for the
    /// countdown.
    Refresh { reply: oneshot::Sender<bool> },

    /// Probe and register a single peer.
    AddDevice {
        address: String,
        reply: oneshot::Sender<Result<Device>>,
    },

    RemoveDevice {
        address: String,
        reply: oneshot::Sender<Result<Device>>,
    },

    UpdateSettings {
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<()>>,
    },
}
