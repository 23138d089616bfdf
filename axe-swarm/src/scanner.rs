//! Probing devices over the miner REST API.
//!
//! A pass fans out over its candidate addresses with at most
//! `concurrency` probes in flight; a finished probe immediately admits the
//! next queued address. Each probe is bounded by [`PROBE_TIMEOUT`]. The
//! pass resolves only once every admitted probe has settled, so callers
//! never observe a partial batch.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::address::{hosts, is_ip_literal, is_valid_peer};
use crate::device::{Device, fallback_device_model, numerize_difficulty};
use crate::device_api::{DeviceApi, ProbeError};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Upper bound on one address's info + asic round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const MAX_CONCURRENT_PROBES: usize = 128;

/// One address to probe, with whatever the registry already knows about
/// it.
#[derive(Debug, Clone)]
pub struct Target {
    pub connection_address: String,
    pub prior: Option<Device>,
}

impl Target {
    pub fn new(connection_address: impl Into<String>) -> Self {
        Self {
            connection_address: connection_address.into(),
            prior: None,
        }
    }

    pub fn known(device: Device) -> Self {
        Self {
            connection_address: device.connection_address.clone(),
            prior: Some(device),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanFailure {
    pub address: String,
    pub error: ProbeError,
}

/// Outcome of one pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Successful probes plus whatever the error handler substituted.
    pub devices: Vec<Device>,
    pub failures: Vec<ScanFailure>,
}

fn decode(payload: Value) -> std::result::Result<Device, ProbeError> {
    if !payload.is_object() {
        return Err(ProbeError::NotAMiner);
    }
    serde_json::from_value(payload).map_err(|e| ProbeError::Decode(e.to_string()))
}

/// Probe a single address.
///
/// Info and asic details are requested concurrently. A failed asic
/// request is tolerated; a failed info request fails the probe. Asic
/// and info are combined, laid over the identity of `prior`, then
/// normalized. A payload with no ASIC model anywhere is not a miner.
pub async fn probe(
    api: &dyn DeviceApi,
    connection_address: &str,
    prior: Option<&Device>,
    fetch_asic: bool,
) -> std::result::Result<Device, ProbeError> {
    let exchange = async {
        if fetch_asic {
            tokio::join!(
                api.system_info(connection_address),
                api.asic_info(connection_address)
            )
        } else {
            (api.system_info(connection_address).await, Ok(Value::Null))
        }
    };

    let (info, asic) = tokio::time::timeout(PROBE_TIMEOUT, exchange)
        .await
        .map_err(|_| ProbeError::Timeout)?;

    let info = decode(info?)?;
    let asic = match asic {
        Ok(Value::Null) => Device::default(),
        Ok(payload) => decode(payload).unwrap_or_default(),
        Err(e) => {
            trace!(address = connection_address, error = %e, "No asic details");
            Device::default()
        }
    };

    let base = prior.cloned().unwrap_or_default();
    let mut device = asic.combine(&info).overlay(&base);
    if device.asic_model.is_none() {
        return Err(ProbeError::NotAMiner);
    }

    device.connection_address = connection_address.to_string();
    if device.address.is_empty() {
        device.address = connection_address.to_string();
    }
    numerize_difficulty(&mut device);
    let mut device = fallback_device_model(device);
    device.refresh_display_name();
    device.failed_polls = 0;

    Ok(device)
}

/// Probe every target and collect the outcomes.
///
/// `on_error` decides what a failed target contributes: a substitute
/// record, or nothing. It is never allowed to abort the pass.
pub async fn scan<F>(
    api: Arc<dyn DeviceApi>,
    targets: Vec<Target>,
    concurrency: usize,
    fetch_asic: bool,
    on_error: F,
) -> ScanReport
where
    F: Fn(&Target, &ProbeError) -> Option<Device>,
{
    let outcomes: Vec<(Target, std::result::Result<Device, ProbeError>)> = stream::iter(targets)
        .map(|target| {
            let api = api.clone();
            async move {
                let result = probe(
                    api.as_ref(),
                    &target.connection_address,
                    target.prior.as_ref(),
                    fetch_asic,
                )
                .await;
                (target, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = ScanReport::default();
    for (target, result) in outcomes {
        match result {
            Ok(device) => report.devices.push(device),
            Err(error) => {
                if let Some(substitute) = on_error(&target, &error) {
                    report.devices.push(substitute);
                }
                report.failures.push(ScanFailure {
                    address: target.connection_address,
                    error,
                });
            }
        }
    }
    report
}

/// Candidate addresses for a discovery pass seeded from `seed`.
///
/// The seed's own `currentIP` and `netmask` take precedence when it
/// reports them. A hostname seed must report `currentIP`; otherwise there
/// is no subnet to scan and the pass is abandoned.
pub async fn resolve_targets(
    api: &dyn DeviceApi,
    seed: &str,
    fallback_netmask: &str,
) -> Result<Vec<String>> {
    if !is_valid_peer(seed) {
        return Err(Error::ScanTarget(format!("{seed:?} is not an address")));
    }

    let info = match tokio::time::timeout(PROBE_TIMEOUT, api.system_info(seed)).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(e)) => {
            debug!(seed, error = %e, "Seed did not report its network");
            None
        }
        Err(_) => {
            debug!(seed, "Seed timed out reporting its network");
            None
        }
    };

    let field = |name: &str| {
        info.as_ref()
            .and_then(|i| i.get(name))
            .and_then(Value::as_str)
            .filter(|s| is_ip_literal(s))
            .map(str::to_string)
    };
    let current_ip = field("currentIP");
    let netmask = field("netmask").unwrap_or_else(|| fallback_netmask.to_string());

    let ip = match current_ip {
        Some(ip) => ip,
        None if is_ip_literal(seed) => seed.to_string(),
        None => {
            return Err(Error::ScanTarget(format!(
                "{seed} did not report its current IP"
            )));
        }
    };

    hosts(&ip, &netmask).map_err(|e| match e {
        Error::ScanTarget(_) => e,
        other => Error::ScanTarget(other.to_string()),
    })
}

/// Discovery pass: probe the seed's subnet, dropping anything that does
/// not answer as a miner.
pub async fn discover(
    api: Arc<dyn DeviceApi>,
    seed: &str,
    fallback_netmask: &str,
    concurrency: usize,
) -> Result<ScanReport> {
    let candidates = resolve_targets(api.as_ref(), seed, fallback_netmask).await?;
    info!(seed, candidates = candidates.len(), "Scanning network");

    let targets = candidates.into_iter().map(Target::new).collect();
    let report = scan(api, targets, concurrency, true, |target, error| {
        trace!(address = %target.connection_address, %error, "No miner");
        None
    })
    .await;

    Ok(report)
}

/// Refresh pass over registered devices.
///
/// A device that fails keeps its record with live telemetry zeroed and
/// its failure count bumped.
pub async fn refresh(
    api: Arc<dyn DeviceApi>,
    known: Vec<Device>,
    concurrency: usize,
    fetch_asic: bool,
) -> ScanReport {
    let targets = known.into_iter().map(Target::known).collect();
    scan(api, targets, concurrency, fetch_asic, |target, error| {
        warn!(address = %target.connection_address, %error, "Failed to get info");
        let mut degraded = target.prior.clone()?;
        degraded.zero_telemetry();
        degraded.failed_polls = degraded.failed_polls.saturating_add(1);
        Some(degraded)
    })
    .await
}

/// Probe a manually entered peer before it is registered.
///
/// Hostnames keep their name as `address` and are dialed by their
/// resolved IP. Auth-shaped failures are reported as needing a firmware
/// upgrade rather than as an absent miner.
pub async fn probe_peer(api: &dyn DeviceApi, input: &str) -> Result<Device> {
    let address = input.trim();
    if !is_valid_peer(address) {
        return Err(Error::InvalidAddress(input.to_string()));
    }

    let connection_address = if is_ip_literal(address) {
        address.to_string()
    } else {
        api.resolve(address)
            .await
            .map_err(|source| Error::NotAMiner {
                address: address.to_string(),
                source,
            })?
    };

    let base = Device::at(address, &connection_address);
    probe(api, &connection_address, Some(&base), true)
        .await
        .map_err(|source| {
            if source.is_auth_shaped() {
                Error::NeedsFirmwareUpgrade(address.to_string())
            } else {
                Error::NotAMiner {
                    address: address.to_string(),
                    source,
                }
            }
        })
}
