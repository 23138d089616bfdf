//! Daemon configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::address::{MAX_SCAN_HOSTS, host_count, is_valid_peer};
use crate::error::{Error, Result};
use crate::scanner::MAX_CONCURRENT_PROBES;

pub const DEFAULT_NETMASK: &str = "255.255.255.0";
pub const DEFAULT_STATE_PATH: &str = "axe-swarm.json";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7786";
pub const DEFAULT_STALE_AFTER: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SwarmConfig {
    /// A reachable device whose subnet discovery scans. Without one,
    /// devices can only be added by hand.
    pub seed: Option<String>,
    /// Used when the seed does not report its own netmask.
    pub netmask: String,
    pub state_path: PathBuf,
    pub listen: SocketAddr,
    pub concurrency: usize,
    /// Consecutive failed polls before a device is flagged stale; 0
    /// disables the flag.
    pub stale_after: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            seed: None,
            netmask: DEFAULT_NETMASK.to_string(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            listen: SocketAddr::from(([127, 0, 0, 1], 7786)),
            concurrency: MAX_CONCURRENT_PROBES,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl SwarmConfig {
    /// Read `AXE_SWARM_*` variables, falling back to defaults for unset
    /// ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(seed) = var("AXE_SWARM_SEED") {
            if !is_valid_peer(&seed) {
                return Err(Error::Config(format!("AXE_SWARM_SEED: {seed:?} is not an address")));
            }
            config.seed = Some(seed);
        }
        if let Some(netmask) = var("AXE_SWARM_NETMASK") {
            match host_count(&netmask) {
                Ok(count) if count <= MAX_SCAN_HOSTS => {}
                Ok(count) => {
                    return Err(Error::Config(format!(
                        "AXE_SWARM_NETMASK: {netmask} spans {count} hosts, more than {MAX_SCAN_HOSTS}"
                    )));
                }
                Err(_) => {
                    return Err(Error::Config(format!("AXE_SWARM_NETMASK: {netmask:?} is not a netmask")));
                }
            }
            config.netmask = netmask;
        }
        if let Some(path) = var("AXE_SWARM_STATE") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(listen) = var("AXE_SWARM_LISTEN") {
            config.listen = parse(&listen, "AXE_SWARM_LISTEN")?;
        }
        if let Some(concurrency) = var("AXE_SWARM_CONCURRENCY") {
            config.concurrency = parse(&concurrency, "AXE_SWARM_CONCURRENCY")?;
            if config.concurrency == 0 {
                return Err(Error::Config("AXE_SWARM_CONCURRENCY must be at least 1".into()));
            }
        }
        if let Some(stale_after) = var("AXE_SWARM_STALE_AFTER") {
            config.stale_after = parse(&stale_after, "AXE_SWARM_STALE_AFTER")?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}
