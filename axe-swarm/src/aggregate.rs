//! Derived views over the fleet: totals, ordering, health notifications,
//! text filtering, and model families.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

use crate::address::{compare_addresses, natural_cmp};
use crate::device::Device;
use crate::suffix::format_suffixed;

/// Clocks below this (but above zero) are flagged as a safety fallback.
pub const FREQUENCY_FLOOR_MHZ: f64 = 400.0;

/// Device fields the fleet can be ordered by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SortField {
    #[default]
    Address,
    DisplayName,
    AsicModel,
    DeviceModel,
    AsicCount,
    HashRate,
    Power,
    Voltage,
    Temp,
    BestDiff,
    BestSessionDiff,
    PoolDifficulty,
    SharesAccepted,
    UptimeSeconds,
    Frequency,
    Version,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// The single active ordering of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Spec after the user selects `field`: the active field flips
    /// direction, any other field starts ascending.
    pub fn select(self, field: SortField) -> Self {
        if self.field == field {
            Self {
                field,
                direction: self.direction.reversed(),
            }
        } else {
            Self {
                field,
                direction: SortDirection::Asc,
            }
        }
    }
}

/// A device field reduced to something comparable.
enum SortKey<'a> {
    Address(&'a str),
    Number(f64),
    Text(&'a str),
    Missing,
}

fn sort_key(device: &Device, field: SortField) -> SortKey<'_> {
    fn number(v: Option<f64>) -> SortKey<'static> {
        v.map_or(SortKey::Missing, SortKey::Number)
    }
    fn text(v: Option<&str>) -> SortKey<'_> {
        v.map_or(SortKey::Missing, SortKey::Text)
    }

    match field {
        SortField::Address => SortKey::Address(&device.address),
        SortField::DisplayName => SortKey::Text(device.short_name()),
        SortField::AsicModel => text(device.asic_model.as_deref()),
        SortField::DeviceModel => text(device.device_model.as_deref()),
        SortField::AsicCount => number(device.asic_count.map(f64::from)),
        SortField::HashRate => number(device.hash_rate),
        SortField::Power => number(device.power),
        SortField::Voltage => number(device.voltage),
        SortField::Temp => number(device.temp),
        SortField::BestDiff => number(device.best_diff_value()),
        SortField::BestSessionDiff => {
            number(device.best_session_diff.as_ref().and_then(|d| d.as_f64()))
        }
        SortField::PoolDifficulty => number(device.pool_difficulty),
        SortField::SharesAccepted => number(device.shares_accepted.map(|v| v as f64)),
        SortField::UptimeSeconds => number(device.uptime_seconds.map(|v| v as f64)),
        SortField::Frequency => number(device.frequency),
        SortField::Version => text(device.version.as_deref()),
    }
}

/// Compare two devices under `spec`.
///
/// Devices lacking the field sort after all others in either direction.
pub fn compare(a: &Device, b: &Device, spec: SortSpec) -> Ordering {
    let ordering = match (sort_key(a, spec.field), sort_key(b, spec.field)) {
        (SortKey::Missing, SortKey::Missing) => return Ordering::Equal,
        (SortKey::Missing, _) => return Ordering::Greater,
        (_, SortKey::Missing) => return Ordering::Less,
        (SortKey::Address(a), SortKey::Address(b)) => compare_addresses(a, b),
        (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(&b),
        (SortKey::Text(a), SortKey::Text(b)) => natural_cmp(a, b),
        _ => Ordering::Equal,
    };

    match spec.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// Stable in-place sort of `devices` under `spec`.
pub fn sort(devices: &mut [Device], spec: SortSpec) {
    devices.sort_by(|a, b| compare(a, b, spec));
}

/// Fleet-wide sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Sum of hashrates in GH/s.
    pub hash_rate: f64,
    /// Sum of power draw in watts.
    pub power: f64,
    /// Highest best difficulty of any device.
    pub best_diff: f64,
}

impl Totals {
    pub fn best_diff_display(&self) -> String {
        format_suffixed(self.best_diff)
    }
}

pub fn totals(devices: &[Device]) -> Totals {
    devices.iter().fold(Totals::default(), |acc, d| Totals {
        hash_rate: acc.hash_rate + d.hash_rate.unwrap_or(0.0),
        power: acc.power + d.power.unwrap_or(0.0),
        best_diff: acc.best_diff.max(d.best_diff_value().unwrap_or(0.0)),
    })
}

/// Health banner for a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    Overheat,
    PowerFault { fault: String },
    LowFrequency { frequency: f64 },
    FallbackPool,
    BlockFound,
    Stale { failed_polls: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Success,
}

impl Notification {
    pub fn severity(&self) -> Severity {
        match self {
            Notification::Overheat | Notification::PowerFault { .. } => Severity::Error,
            Notification::LowFrequency { .. }
            | Notification::FallbackPool
            | Notification::Stale { .. } => Severity::Warning,
            Notification::BlockFound => Severity::Success,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Overheat => write!(f, "Overheat mode active"),
            Notification::PowerFault { fault } => write!(f, "Power fault: {fault}"),
            Notification::LowFrequency { frequency } => {
                write!(f, "Frequency low ({frequency:.0} MHz)")
            }
            Notification::FallbackPool => write!(f, "Using fallback pool"),
            Notification::BlockFound => write!(f, "Block found"),
            Notification::Stale { failed_polls } => {
                write!(f, "Not responding ({failed_polls} failed polls)")
            }
        }
    }
}

/// The most severe condition of `device`, if any.
///
/// Checks run in a fixed order and only the first match is returned:
/// overheat, power fault, low frequency, fallback pool, block found, then
/// staleness.
pub fn notify(device: &Device, stale_after: u32) -> Option<Notification> {
    if device.overheat_mode == Some(true) {
        return Some(Notification::Overheat);
    }
    if let Some(fault) = device.power_fault.as_deref().filter(|f| !f.is_empty()) {
        return Some(Notification::PowerFault {
            fault: fault.to_string(),
        });
    }
    if let Some(frequency) = device
        .frequency
        .filter(|&f| f > 0.0 && f < FREQUENCY_FLOOR_MHZ)
    {
        return Some(Notification::LowFrequency { frequency });
    }
    if device.is_using_fallback_stratum == Some(true) {
        return Some(Notification::FallbackPool);
    }
    if device.block_found == Some(true) {
        return Some(Notification::BlockFound);
    }
    if device.is_stale(stale_after) {
        return Some(Notification::Stale {
            failed_polls: device.failed_polls,
        });
    }
    None
}

/// Whether `device`'s display name, ASIC model, device model, or address
/// contains `text`, ignoring case. Empty text matches everything.
pub fn matches(device: &Device, text: &str) -> bool {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    [
        Some(device.short_name()),
        device.display_name.as_deref(),
        device.asic_model.as_deref(),
        device.device_model.as_deref(),
        Some(device.address.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}

pub fn filter<'a>(devices: &'a [Device], text: &str) -> Vec<&'a Device> {
    devices.iter().filter(|d| matches(d, text)).collect()
}

/// A distinct hardware configuration present in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub device_model: Option<String>,
    #[serde(rename = "ASICModel")]
    pub asic_model: Option<String>,
    pub asic_count: Option<u32>,
    pub swarm_color: Option<String>,
}

/// Distinct `(deviceModel, ASICModel, asicCount)` combinations, in order
/// of first appearance.
pub fn families(devices: &[Device]) -> Vec<Family> {
    let mut seen: Vec<Family> = Vec::new();
    for device in devices {
        let is_new = !seen.iter().any(|f| {
            f.device_model == device.device_model
                && f.asic_model == device.asic_model
                && f.asic_count == device.asic_count
        });
        if is_new {
            seen.push(Family {
                device_model: device.device_model.clone(),
                asic_model: device.asic_model.clone(),
                asic_count: device.asic_count,
                swarm_color: device.swarm_color.clone(),
            });
        }
    }
    seen
}
