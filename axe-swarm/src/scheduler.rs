//! The swarm engine task.
//!
//! A single task owns the registry and the `scanning`/`refreshing` flags.
//! It advances the refresh countdown once a second, serves commands from
//! the API, and applies finished scan passes. Nothing else mutates swarm
//! state, so no locking is needed beyond the rule that a scan and a
//! refresh never overlap.
//!
//! After every change the engine publishes a [`SwarmState`] snapshot on a
//! watch channel for readers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::aggregate::notify;
use crate::api::commands::SwarmCommand;
use crate::api_client::types::{
    DeviceState, PassSummary, SettingsPatch, SwarmState, TotalsState, ViewMode,
};
use crate::address::is_valid_peer;
use crate::config::SwarmConfig;
use crate::device::Device;
use crate::device_api::DeviceApi;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::scanner::{self, ScanReport};
use crate::store::{self, SWARM_REFRESH_TIME, SWARM_VIEW, Store};
use crate::tracing::prelude::*;

pub const DEFAULT_REFRESH_INTERVAL: u32 = 30;

const TICK: Duration = Duration::from_secs(1);

/// Seconds remaining until the next automatic refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    interval: u32,
    remaining: u32,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL)
    }
}

impl Countdown {
    pub fn new(interval: u32) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            remaining: interval,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Advance one second. Returns true when a refresh is due.
    ///
    /// The countdown holds while a pass is running or while there is
    /// nothing to refresh.
    pub fn tick(&mut self, busy: bool, has_devices: bool) -> bool {
        if busy || !has_devices {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }

    /// Change the interval and restart the countdown from it.
    pub fn set_interval(&mut self, interval: u32) {
        *self = Self::new(interval);
    }
}

/// A finished background operation, applied on the engine task.
enum Completion {
    Discovery(Result<ScanReport>),
    Refresh(ScanReport),
    Added {
        result: Result<Device>,
        reply: oneshot::Sender<Result<Device>>,
    },
}

pub struct Scheduler {
    api: Arc<dyn DeviceApi>,
    store: Arc<dyn Store>,
    registry: Registry,
    countdown: Countdown,
    view: ViewMode,
    seed: Option<String>,
    netmask: String,
    concurrency: usize,
    stale_after: u32,
    /// Whether a device list was stored when the engine started.
    had_data: bool,
    scanning: bool,
    refreshing: bool,
    last_pass: Option<PassSummary>,
    /// Background passes and peer probes, each reporting back on
    /// `completion_tx`.
    passes: TaskTracker,
    in_flight: usize,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    state_tx: watch::Sender<SwarmState>,
}

impl Scheduler {
    pub fn new(api: Arc<dyn DeviceApi>, store: Arc<dyn Store>, config: &SwarmConfig) -> Self {
        let (registry, had_data) = Registry::open(store.clone());
        let interval = store::load(store.as_ref(), SWARM_REFRESH_TIME)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let view = store::load(store.as_ref(), SWARM_VIEW).unwrap_or_default();
        let (state_tx, _) = watch::channel(SwarmState::default());
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            api,
            store,
            registry,
            countdown: Countdown::new(interval),
            view,
            seed: config.seed.clone(),
            netmask: config.netmask.clone(),
            concurrency: config.concurrency,
            stale_after: config.stale_after,
            had_data,
            scanning: false,
            refreshing: false,
            last_pass: None,
            passes: TaskTracker::new(),
            in_flight: 0,
            completion_tx,
            completion_rx,
            state_tx,
        };
        scheduler.publish();
        scheduler
    }

    pub fn subscribe(&self) -> watch::Receiver<SwarmState> {
        self.state_tx.subscribe()
    }

    /// Run `work` in the background and hand its result to the engine.
    ///
    /// Once the engine has stopped, the result is dropped unapplied.
    fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let completion_tx = self.completion_tx.clone();
        self.passes.spawn(async move {
            let _ = completion_tx.send(work.await);
        });
    }

    fn busy(&self) -> bool {
        self.scanning || self.refreshing
    }

    /// First pass after startup: rescan when nothing was stored, otherwise
    /// refresh what was.
    fn start(&mut self) {
        if self.had_data {
            self.start_refresh(true);
        } else if let Err(e) = self.start_scan() {
            info!(reason = %e, "No stored devices and discovery is unavailable");
        }
    }

    /// Begin a discovery pass unless one is already running.
    pub fn start_scan(&mut self) -> Result<bool> {
        let seed = self
            .seed
            .clone()
            .ok_or_else(|| Error::Config("no seed address is configured for discovery".into()))?;
        if self.busy() {
            debug!("Scan requested while busy, ignoring");
            return Ok(false);
        }

        self.scanning = true;
        let api = self.api.clone();
        let netmask = self.netmask.clone();
        let concurrency = self.concurrency;
        self.spawn(async move {
            Completion::Discovery(scanner::discover(api, &seed, &netmask, concurrency).await)
        });
        Ok(true)
    }

    /// Begin a refresh pass over the registry unless a pass is running.
    pub fn start_refresh(&mut self, fetch_asic: bool) -> bool {
        if self.busy() {
            debug!("Refresh requested while busy, ignoring");
            return false;
        }
        if self.registry.is_empty() {
            return false;
        }

        self.refreshing = true;
        self.countdown.reset();
        let api = self.api.clone();
        let known = self.registry.devices().to_vec();
        let concurrency = self.concurrency;
        debug!(devices = known.len(), fetch_asic, "Refreshing");
        self.spawn(async move {
            Completion::Refresh(scanner::refresh(api, known, concurrency, fetch_asic).await)
        });
        true
    }

    fn tick(&mut self) {
        if self.countdown.tick(self.busy(), !self.registry.is_empty()) {
            self.start_refresh(false);
        }
    }

    fn handle_command(&mut self, cmd: SwarmCommand) {
        match cmd {
            SwarmCommand::Scan { reply } => {
                let started = self.start_scan();
                self.publish();
                let _ = reply.send(started);
            }
            SwarmCommand::Refresh { reply } => {
                let started = self.start_refresh(true);
                self.publish();
                let _ = reply.send(started);
            }
            SwarmCommand::AddDevice { address, reply } => self.add_device(address, reply),
            SwarmCommand::RemoveDevice { address, reply } => {
                let result = self
                    .registry
                    .remove(address.trim())
                    .ok_or(Error::UnknownDevice(address));
                if let Ok(device) = &result {
                    info!(address = %device.address, "Device removed");
                }
                self.publish();
                let _ = reply.send(result);
            }
            SwarmCommand::UpdateSettings { patch, reply } => {
                let result = self.update_settings(patch);
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    fn add_device(&mut self, address: String, reply: oneshot::Sender<Result<Device>>) {
        let address = address.trim().to_string();
        if !is_valid_peer(&address) {
            let _ = reply.send(Err(Error::InvalidAddress(address)));
            return;
        }
        if self.registry.find(&address).is_some() {
            let _ = reply.send(Err(Error::Duplicate(address)));
            return;
        }

        let api = self.api.clone();
        self.spawn(async move {
            let result = scanner::probe_peer(api.as_ref(), &address).await;
            Completion::Added { result, reply }
        });
    }

    /// Apply a settings patch whole, or not at all when it is invalid.
    ///
    /// A failed write is logged like registry writes are; the applied
    /// settings stay in effect for the session.
    fn update_settings(&mut self, patch: SettingsPatch) -> Result<()> {
        if patch.refresh_interval == Some(0) {
            return Err(Error::Config("refresh interval must be at least 1 second".into()));
        }

        if let Some(interval) = patch.refresh_interval {
            self.countdown.set_interval(interval);
            info!(interval, "Refresh interval changed");
            if let Err(e) = store::save(self.store.as_ref(), SWARM_REFRESH_TIME, &interval) {
                error!("Failed to save refresh interval: {e}");
            }
        }
        if let Some(field) = patch.sort {
            let spec = self.registry.sort_by(field);
            debug!(field = %spec.field, direction = %spec.direction, "Sort changed");
        }
        if let Some(view) = patch.view {
            self.view = view;
            if let Err(e) = store::save(self.store.as_ref(), SWARM_VIEW, &view) {
                error!("Failed to save view mode: {e}");
            }
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Discovery(Ok(report)) => {
                let found = report.devices.len();
                let added = self.registry.merge(report.devices);
                info!(found, added, "Network scan complete");
                self.last_pass = Some(PassSummary::Discovery { found, added });
                self.scanning = false;
            }
            Completion::Discovery(Err(e)) => {
                error!("Network scan failed: {e}");
                self.last_pass = Some(PassSummary::DiscoveryFailed {
                    error: e.to_string(),
                });
                self.scanning = false;
            }
            Completion::Refresh(report) => {
                let polled = report.devices.len();
                let warnings: Vec<String> = report
                    .failures
                    .iter()
                    .map(|f| format!("Failed to get info from {}: {}", f.address, f.error))
                    .collect();
                self.registry.apply_refresh(report.devices);
                if warnings.is_empty() {
                    debug!(polled, "Refresh complete");
                } else {
                    info!(polled, failed = warnings.len(), "Refresh complete");
                }
                self.last_pass = Some(PassSummary::Refresh { polled, warnings });
                self.refreshing = false;
                self.countdown.reset();
            }
            Completion::Added { result, reply } => {
                let result = result.and_then(|device| {
                    self.registry.insert(device.clone())?;
                    info!(address = %device.address, "Device added");
                    Ok(device)
                });
                if let Err(e) = &result {
                    warn!("Failed to add device: {e}");
                }
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    fn snapshot(&self) -> SwarmState {
        let devices = self
            .registry
            .devices()
            .iter()
            .map(|device| {
                let notification = notify(device, self.stale_after);
                DeviceState {
                    severity: notification.as_ref().map(|n| n.severity()),
                    notification,
                    stale: device.is_stale(self.stale_after),
                    device: device.clone(),
                }
            })
            .collect();

        SwarmState {
            devices,
            totals: TotalsState::new(self.registry.totals(), self.registry.len()),
            sort: self.registry.sort_spec(),
            refresh_interval: self.countdown.interval(),
            countdown: self.countdown.remaining(),
            scanning: self.scanning,
            refreshing: self.refreshing,
            view: self.view,
            last_pass: self.last_pass.clone(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    /// Run until `running` is cancelled.
    ///
    /// On shutdown, passes still in flight are left to finish their
    /// requests; their results are never applied.
    ///
    /// Replies are sent after the resulting state is published, so a
    /// caller that reads the snapshot after its reply sees its change.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<SwarmCommand>, running: CancellationToken) {
        trace!("Swarm engine started.");

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        self.start();
        self.publish();

        loop {
            tokio::select! {
                _ = running.cancelled() => {
                    info!("Swarm engine shutdown requested");
                    break;
                }

                _ = ticker.tick() => self.tick(),

                Some(cmd) = cmd_rx.recv() => self.handle_command(cmd),

                Some(completion) = self.completion_rx.recv() => self.complete(completion),
            }
            self.publish();
        }

        self.passes.close();
        if !self.passes.is_empty() {
            debug!(pending = self.passes.len(), "Discarding results of unfinished passes");
        }
        trace!("Swarm engine stopped.");
    }
}
