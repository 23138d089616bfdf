//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

use crate::aggregate::{Notification, Severity, SortField, SortSpec, Totals};
use crate::device::Device;

/// Full swarm snapshot, as published by the engine after every change.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwarmState {
    /// Registered devices in sort order.
    pub devices: Vec<DeviceState>,
    pub totals: TotalsState,
    pub sort: SortSpec,
    /// Seconds between automatic refreshes.
    pub refresh_interval: u32,
    /// Seconds until the next automatic refresh.
    pub countdown: u32,
    pub scanning: bool,
    pub refreshing: bool,
    pub view: ViewMode,
    /// Outcome of the most recent scan or refresh pass.
    pub last_pass: Option<PassSummary>,
}

impl SwarmState {
    pub fn find(&self, address: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.device.is_known_as(address))
    }
}

/// A device together with its derived health.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device: Device,
    pub notification: Option<Notification>,
    pub severity: Option<Severity>,
    pub stale: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotalsState {
    pub device_count: usize,
    /// GH/s.
    pub hash_rate: f64,
    /// Watts.
    pub power: f64,
    pub best_diff: f64,
}

impl TotalsState {
    pub fn new(totals: Totals, device_count: usize) -> Self {
        Self {
            device_count,
            hash_rate: totals.hash_rate,
            power: totals.power,
            best_diff: totals.best_diff,
        }
    }

    pub fn best_diff_display(&self) -> String {
        Totals {
            hash_rate: self.hash_rate,
            power: self.power,
            best_diff: self.best_diff,
        }
        .best_diff_display()
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PassSummary {
    Discovery {
        /// Miners that answered.
        found: usize,
        /// Of those, how many were not yet registered.
        added: usize,
    },
    /// The network to scan could not be determined.
    DiscoveryFailed { error: String },
    Refresh {
        polled: usize,
        /// One line per device that failed to answer.
        warnings: Vec<String>,
    },
}

/// Partial update to engine settings. Absent fields are left alone.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub refresh_interval: Option<u32>,
    /// Select a sort field; selecting the active one flips direction.
    pub sort: Option<SortField>,
    pub view: Option<ViewMode>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct AddDeviceRequest {
    /// Dotted-quad IP or bare hostname, optionally `.local`-suffixed.
    pub address: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ScanResponse {
    /// False when a scan or refresh was already running.
    pub started: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
