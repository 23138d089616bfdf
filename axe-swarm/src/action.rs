//! One-shot device actions (restart, identify).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::device::Device;
use crate::device_api::{DeviceAction, DeviceApi, ProbeError};
use crate::tracing::prelude::*;

pub const ACTION_TIMEOUT: Duration = Duration::from_millis(800);

/// What happened when an action was sent to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ActionOutcome {
    /// The device accepted the action; `message` is its own reply.
    Ok { message: String },
    /// No reply within [`ACTION_TIMEOUT`].
    Timeout,
    Failed { error: String },
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ActionOutcome::Ok { .. })
    }
}

/// Send `action` to `device` and report the outcome.
///
/// Never touches registry state.
pub async fn dispatch(api: &dyn DeviceApi, device: &Device, action: DeviceAction) -> ActionOutcome {
    let address = &device.connection_address;
    let outcome = match tokio::time::timeout(ACTION_TIMEOUT, api.post_action(address, action)).await
    {
        Ok(Ok(message)) => ActionOutcome::Ok { message },
        Ok(Err(ProbeError::Timeout)) | Err(_) => ActionOutcome::Timeout,
        Ok(Err(e)) => ActionOutcome::Failed {
            error: e.to_string(),
        },
    };

    match &outcome {
        ActionOutcome::Ok { .. } => info!(%address, %action, "Action sent"),
        ActionOutcome::Timeout => warn!(%address, %action, "Action timed out"),
        ActionOutcome::Failed { error } => warn!(%address, %action, error = %error, "Action failed"),
    }
    outcome
}
