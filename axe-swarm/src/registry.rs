//! The persisted set of known devices.
//!
//! The registry is the single writer of [`SWARM_DATA`] and
//! [`SWARM_SORTING`]. Every mutation re-sorts under the active
//! [`SortSpec`], recomputes totals, and writes the list back before
//! returning. A failed write is logged; the in-memory state stays
//! authoritative for the rest of the session.

use std::collections::HashMap;
use std::sync::Arc;

use crate::aggregate::{self, SortField, SortSpec, Totals};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::store::{self, SWARM_DATA, SWARM_SORTING, Store};
use crate::tracing::prelude::*;

pub struct Registry {
    store: Arc<dyn Store>,
    devices: Vec<Device>,
    sort: SortSpec,
    totals: Totals,
}

impl Registry {
    /// Load the registry from `store`.
    ///
    /// Returns the registry and whether any device list was stored at all,
    /// which decides between an initial scan and an initial refresh.
    pub fn open(store: Arc<dyn Store>) -> (Self, bool) {
        let stored: Option<Vec<Device>> = store::load(store.as_ref(), SWARM_DATA);
        let had_data = stored.is_some();
        let sort = store::load(store.as_ref(), SWARM_SORTING).unwrap_or_default();

        let mut registry = Self {
            store,
            devices: stored.unwrap_or_default(),
            sort,
            totals: Totals::default(),
        };
        registry.resort();
        debug!(devices = registry.devices.len(), had_data, "Registry loaded");

        (registry, had_data)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn find(&self, address: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_known_as(address))
    }

    pub fn contains_connection(&self, connection_address: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.connection_address == connection_address)
    }

    /// Append newly discovered devices.
    ///
    /// A device is skipped when it shares an address or a connection
    /// address with a registered device or with one earlier in the batch.
    /// Returns how many were added.
    pub fn merge(&mut self, discovered: Vec<Device>) -> usize {
        let mut added = 0;
        for device in discovered {
            if self.devices.iter().any(|d| d.same_identity(&device)) {
                trace!(address = %device.address, "Already registered");
                continue;
            }
            self.devices.push(device);
            added += 1;
        }

        if added > 0 {
            self.commit();
        }
        added
    }

    /// Register a single manually added device.
    pub fn insert(&mut self, device: Device) -> Result<()> {
        if self.contains_connection(&device.connection_address) {
            return Err(Error::Duplicate(device.connection_address));
        }
        self.devices.push(device);
        self.commit();
        Ok(())
    }

    /// Drop the device known as `address`, by either identity.
    pub fn remove(&mut self, address: &str) -> Option<Device> {
        let index = self.devices.iter().position(|d| d.is_known_as(address))?;
        let removed = self.devices.remove(index);
        self.commit();
        Some(removed)
    }

    /// Replace records with the outcome of a refresh pass.
    ///
    /// Each result replaces the record with the same connection address.
    /// Results for devices removed while the pass was running are
    /// discarded; devices added while it was running are kept as they are.
    pub fn apply_refresh(&mut self, refreshed: Vec<Device>) {
        let mut by_connection: HashMap<String, Device> = refreshed
            .into_iter()
            .map(|d| (d.connection_address.clone(), d))
            .collect();

        for slot in &mut self.devices {
            if let Some(fresh) = by_connection.remove(&slot.connection_address) {
                *slot = fresh;
            }
        }
        if !by_connection.is_empty() {
            debug!(
                discarded = by_connection.len(),
                "Refresh results for devices no longer registered"
            );
        }

        self.commit();
    }

    /// Sort by `field`, toggling direction if it is already active.
    pub fn sort_by(&mut self, field: SortField) -> SortSpec {
        self.set_sort(self.sort.select(field));
        self.sort
    }

    pub fn set_sort(&mut self, spec: SortSpec) {
        self.sort = spec;
        if let Err(e) = store::save(self.store.as_ref(), SWARM_SORTING, &self.sort) {
            warn!(error = %e, "Failed to persist sort order");
        }
        self.commit();
    }

    fn resort(&mut self) {
        aggregate::sort(&mut self.devices, self.sort);
        self.totals = aggregate::totals(&self.devices);
    }

    fn commit(&mut self) {
        self.resort();
        if let Err(e) = store::save(self.store.as_ref(), SWARM_DATA, &self.devices) {
            warn!(error = %e, "Failed to persist device list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SortDirection;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn miner(address: &str, hash_rate: f64) -> Device {
        Device {
            hash_rate: Some(hash_rate),
            power: Some(15.0),
            ..Device::at(address, address)
        }
    }

    fn open_empty() -> (Registry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (registry, had_data) = Registry::open(store.clone());
        assert!(!had_data);
        (registry, store)
    }

    fn stored_addresses(store: &MemoryStore) -> Vec<String> {
        let devices: Vec<Device> = store::load(store, SWARM_DATA).unwrap();
        devices.into_iter().map(|d| d.address).collect()
    }

    #[test]
    fn merge_skips_known_and_repeated_devices() {
        let (mut registry, store) = open_empty();
        assert_eq!(registry.merge(vec![miner("10.0.0.2", 1.0)]), 1);

        let added = registry.merge(vec![
            miner("10.0.0.2", 2.0),
            miner("10.0.0.3", 3.0),
            miner("10.0.0.3", 4.0),
        ]);
        assert_eq!(added, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("10.0.0.2").unwrap().hash_rate, Some(1.0));
        assert_eq!(stored_addresses(&store), ["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn merge_matches_on_connection_address() {
        let (mut registry, _) = open_empty();
        registry.merge(vec![Device::at("bitaxe.local", "10.0.0.9")]);

        assert_eq!(registry.merge(vec![Device::at("10.0.0.9", "10.0.0.9")]), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_rejects_duplicate_connection() {
        let (mut registry, _) = open_empty();
        registry.insert(Device::at("gamma.local", "10.0.0.4")).unwrap();

        let err = registry
            .insert(Device::at("10.0.0.4", "10.0.0.4"))
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate(addr) if addr == "10.0.0.4"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_by_either_identity() {
        let (mut registry, store) = open_empty();
        registry.merge(vec![
            Device::at("gamma.local", "10.0.0.4"),
            miner("10.0.0.5", 1.0),
        ]);

        assert_eq!(registry.remove("10.0.0.4").unwrap().address, "gamma.local");
        assert!(registry.remove("10.0.0.4").is_none());
        assert_eq!(registry.remove("10.0.0.5").unwrap().address, "10.0.0.5");
        assert!(registry.is_empty());
        assert!(stored_addresses(&store).is_empty());
    }

    #[test]
    fn refresh_replaces_matching_slots_and_keeps_new_ones() {
        let (mut registry, _) = open_empty();
        registry.merge(vec![miner("10.0.0.2", 1.0), miner("10.0.0.3", 1.0)]);
        let pass: Vec<String> = registry
            .devices()
            .iter()
            .map(|d| d.connection_address.clone())
            .collect();

        // Added and removed while the pass was in flight.
        registry.insert(miner("10.0.0.7", 7.0)).unwrap();
        registry.remove("10.0.0.3");

        let results = pass.iter().map(|a| miner(a, 50.0)).collect();
        registry.apply_refresh(results);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("10.0.0.2").unwrap().hash_rate, Some(50.0));
        assert_eq!(registry.find("10.0.0.7").unwrap().hash_rate, Some(7.0));
        assert!(registry.find("10.0.0.3").is_none());
    }

    #[test]
    fn totals_follow_mutations() {
        let (mut registry, _) = open_empty();
        registry.merge(vec![miner("10.0.0.2", 400.0), miner("10.0.0.3", 600.0)]);
        assert_eq!(registry.totals().hash_rate, 1000.0);
        assert_eq!(registry.totals().power, 30.0);

        registry.remove("10.0.0.2");
        assert_eq!(registry.totals().hash_rate, 600.0);
    }

    #[test]
    fn sort_order_is_applied_and_persisted() {
        let (mut registry, store) = open_empty();
        registry.merge(vec![
            miner("10.0.0.2", 300.0),
            miner("10.0.0.3", 900.0),
            miner("10.0.0.4", 600.0),
        ]);

        let spec = registry.sort_by(SortField::HashRate);
        assert_eq!(spec.direction, SortDirection::Asc);
        assert_eq!(stored_addresses(&store), ["10.0.0.2", "10.0.0.4", "10.0.0.3"]);

        let spec = registry.sort_by(SortField::HashRate);
        assert_eq!(spec.direction, SortDirection::Desc);
        assert_eq!(registry.devices()[0].address, "10.0.0.3");

        let stored: SortSpec = store::load(&*store, SWARM_SORTING).unwrap();
        assert_eq!(stored, spec);
    }

    #[test]
    fn reopen_restores_devices_and_order() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                SWARM_DATA,
                json!([
                    {"address": "10.0.0.9", "connectionAddress": "10.0.0.9", "hashRate": 5},
                    {"address": "10.0.0.1", "connectionAddress": "10.0.0.1", "hashRate": 9},
                ]),
            )
            .unwrap();
        store
            .put(SWARM_SORTING, json!({"field": "hashRate", "direction": "desc"}))
            .unwrap();

        let (registry, had_data) = Registry::open(store);
        assert!(had_data);
        assert_eq!(registry.devices()[0].address, "10.0.0.1");
        assert_eq!(registry.sort_spec().field, SortField::HashRate);
    }

    #[test]
    fn empty_stored_list_still_counts_as_data() {
        let store = Arc::new(MemoryStore::new());
        store.put(SWARM_DATA, json!([])).unwrap();
        let (registry, had_data) = Registry::open(store);
        assert!(had_data);
        assert!(registry.is_empty());
    }
}
