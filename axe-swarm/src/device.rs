//! The fleet member record.
//!
//! A [`Device`] is built from the JSON the miner returns on
//! `/api/system/info` and `/api/system/asic`, layered over whatever the
//! registry already knew about that device. Unknown payload fields are
//! kept in [`Device::extra`] so newer firmware round-trips through the
//! state file unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::suffix::SuffixedNumber;

/// `boardVersion` values that map to a model despite their leading digit.
const BOARD_VERSION_EXCEPTIONS: [(&str, &str); 2] = [("2.2", "Max"), ("0.11", "Ultra")];

/// Leading `boardVersion` digit to device model.
const BOARD_VERSION_PREFIXES: [(char, &str); 6] = [
    ('1', "Max"),
    ('2', "Ultra"),
    ('3', "UltraHex"),
    ('4', "Supra"),
    ('6', "Gamma"),
    ('8', "GammaTurbo"),
];

const SWARM_COLORS: [(&str, &str); 7] = [
    ("Max", "red"),
    ("Ultra", "purple"),
    ("Supra", "blue"),
    ("UltraHex", "orange"),
    ("Gamma", "green"),
    ("GammaHex", "lime"),
    ("GammaTurbo", "cyan"),
];

pub const UNKNOWN_MODEL: &str = "Other";
pub const UNKNOWN_COLOR: &str = "gray";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    /// Display and link identity: the hostname the device was added by,
    /// otherwise its IP.
    pub address: String,

    /// IP the engine dials for every HTTP call.
    pub connection_address: String,

    pub display_name: Option<String>,
    pub hostname: Option<String>,

    /// Address the device reports for itself.
    #[serde(rename = "currentIP")]
    pub current_ip: Option<String>,

    #[serde(rename = "ASICModel", alias = "asicModel")]
    pub asic_model: Option<String>,
    pub device_model: Option<String>,
    pub asic_count: Option<u32>,
    pub swarm_color: Option<String>,
    pub board_version: Option<String>,

    /// Hashrate in GH/s.
    pub hash_rate: Option<f64>,
    #[serde(rename = "hashrate", skip_serializing)]
    #[schema(ignore)]
    pub legacy_hash_rate: Option<f64>,
    /// Power draw in watts.
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub temp: Option<f64>,
    pub best_diff: Option<SuffixedNumber>,
    pub best_session_diff: Option<SuffixedNumber>,
    pub pool_difficulty: Option<f64>,
    #[serde(rename = "stratumDiff", skip_serializing)]
    #[schema(ignore)]
    pub stratum_diff: Option<f64>,
    pub shares_accepted: Option<u64>,
    pub uptime_seconds: Option<u64>,
    /// ASIC clock in MHz.
    pub frequency: Option<f64>,
    #[serde(rename = "overheat_mode", alias = "overheatMode", deserialize_with = "de_flag")]
    pub overheat_mode: Option<bool>,
    #[serde(rename = "power_fault", alias = "powerFault", deserialize_with = "de_text")]
    pub power_fault: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub is_using_fallback_stratum: Option<bool>,
    #[serde(deserialize_with = "de_flag")]
    pub block_found: Option<bool>,
    #[serde(deserialize_with = "de_text")]
    pub version: Option<String>,

    /// Consecutive refresh passes this device failed to answer.
    #[serde(skip_serializing_if = "is_zero")]
    pub failed_polls: u32,

    /// Payload fields this engine does not interpret.
    #[serde(flatten)]
    #[schema(ignore)]
    pub extra: Map<String, Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Accept firmware booleans sent as `true`/`false`, `0`/`1`, or strings.
fn de_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|v| v != 0.0))),
        Some(Value::String(s)) => Ok(Some(!matches!(s.as_str(), "" | "0" | "false"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a flag, found {other}"
        ))),
    }
}

/// Accept free text that older firmware sometimes sends as a number.
fn de_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected text, found {other}"
        ))),
    }
}

/// For each listed optional field, take `base`'s value when `fresh` has
/// none.
macro_rules! fill_missing {
    ($fresh:ident from $base:ident: $($field:ident),* $(,)?) => {
        $(
            if $fresh.$field.is_none() {
                $fresh.$field = $base.$field.clone();
            }
        )*
    };
}

impl Device {
    /// A record known only by its address, before any probe.
    pub fn at(address: impl Into<String>, connection_address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connection_address: connection_address.into(),
            ..Default::default()
        }
    }

    /// Layer `self` over `base`, field by field.
    ///
    /// Every field present in `self` wins; every field absent from `self`
    /// is taken from `base`. Only for payloads from the same poll.
    /// Addresses count as absent when empty.
    pub fn combine(self, base: &Device) -> Device {
        let mut fresh = self.overlay(base);
        fill_missing!(fresh from base:
            hash_rate,
            legacy_hash_rate,
            power,
            voltage,
            temp,
            best_diff,
            best_session_diff,
            pool_difficulty,
            stratum_diff,
            shares_accepted,
            uptime_seconds,
            frequency,
            overheat_mode,
            power_fault,
            is_using_fallback_stratum,
            block_found,
        );
        fresh
    }

    /// Layer a fresh poll over the record a previous poll produced.
    ///
    /// Identity fields fall back to `base` when `self` lacks them. Live
    /// telemetry and health flags are taken from `self` alone, so a
    /// cleared fault stays cleared. `failed_polls` always comes from
    /// `self`.
    pub fn overlay(self, base: &Device) -> Device {
        let mut fresh = self;
        if fresh.address.is_empty() {
            fresh.address = base.address.clone();
        }
        if fresh.connection_address.is_empty() {
            fresh.connection_address = base.connection_address.clone();
        }

        fill_missing!(fresh from base:
            display_name,
            hostname,
            current_ip,
            asic_model,
            device_model,
            asic_count,
            swarm_color,
            board_version,
            version,
        );

        let mut extra = base.extra.clone();
        extra.extend(std::mem::take(&mut fresh.extra));
        fresh.extra = extra;

        fresh
    }

    /// Whether `self` and `other` share an address or connection address.
    pub fn same_identity(&self, other: &Device) -> bool {
        self.address == other.address || self.connection_address == other.connection_address
    }

    /// Whether `address` names this device, by either identity.
    pub fn is_known_as(&self, address: &str) -> bool {
        self.address == address || self.connection_address == address
    }

    /// Hostname without its `.local` suffix, falling back to the address.
    pub fn short_name(&self) -> &str {
        match self.hostname.as_deref() {
            Some(name) if !name.is_empty() => name.strip_suffix(".local").unwrap_or(name),
            _ => &self.address,
        }
    }

    pub fn refresh_display_name(&mut self) {
        self.display_name = Some(self.short_name().to_string());
    }

    /// Reset live telemetry after a failed poll. Identity fields are kept.
    pub fn zero_telemetry(&mut self) {
        self.hash_rate = Some(0.0);
        self.shares_accepted = Some(0);
        self.power = Some(0.0);
        self.voltage = Some(0.0);
        self.temp = Some(0.0);
        self.best_diff = Some(SuffixedNumber::Number(0.0));
        self.uptime_seconds = Some(0);
        self.pool_difficulty = Some(0.0);
    }

    /// Whether enough consecutive polls failed to distrust the record.
    pub fn is_stale(&self, stale_after: u32) -> bool {
        stale_after > 0 && self.failed_polls >= stale_after
    }

    pub fn best_diff_value(&self) -> Option<f64> {
        self.best_diff.as_ref().and_then(SuffixedNumber::as_f64)
    }
}

/// Fill in classification fields older firmware does not report.
///
/// Payloads that already carry `deviceModel`, `swarmColor`,
/// `poolDifficulty`, and `hashRate` pass through untouched.
pub fn fallback_device_model(mut device: Device) -> Device {
    if device.device_model.is_some()
        && device.swarm_color.is_some()
        && device.pool_difficulty.is_some()
        && device.hash_rate.is_some()
    {
        return device;
    }

    let model = device
        .device_model
        .take()
        .unwrap_or_else(|| derive_device_model(device.board_version.as_deref()).to_string());
    if device.swarm_color.is_none() {
        device.swarm_color = Some(swarm_color(&model).to_string());
    }
    device.device_model = Some(model);
    device.pool_difficulty = device.pool_difficulty.or(device.stratum_diff);
    device.hash_rate = device.hash_rate.or(device.legacy_hash_rate);

    device
}

/// Convert abbreviated difficulty strings (`"1.5M"`) to numbers.
pub fn numerize_difficulty(device: &mut Device) {
    if let Some(diff) = device.best_diff.as_mut() {
        diff.numerize();
    }
    if let Some(diff) = device.best_session_diff.as_mut() {
        diff.numerize();
    }
}

/// Device model implied by a board revision string.
pub fn derive_device_model(board_version: Option<&str>) -> &'static str {
    let Some(version) = board_version.filter(|v| v.len() > 1) else {
        return UNKNOWN_MODEL;
    };

    if let Some((_, model)) = BOARD_VERSION_EXCEPTIONS.iter().find(|(v, _)| *v == version) {
        return *model;
    }

    version
        .chars()
        .next()
        .and_then(|first| BOARD_VERSION_PREFIXES.iter().find(|(c, _)| *c == first))
        .map_or(UNKNOWN_MODEL, |(_, model)| *model)
}

pub fn swarm_color(device_model: &str) -> &'static str {
    SWARM_COLORS
        .iter()
        .find(|(model, _)| *model == device_model)
        .map_or(UNKNOWN_COLOR, |(_, color)| *color)
}
