//! Discovery, polling, and aggregation for fleets ("swarms") of Bitaxe
//! miners.
//!
//! The engine scans a subnet for devices that answer the miner REST API,
//! keeps a persisted registry of them, re-polls the registry on a
//! countdown with bounded concurrency, and derives totals, sort orders,
//! and health notifications for presentation. The daemon exposes the
//! result over an HTTP API; the CLI is a thin client of that API.

pub mod action;
pub mod address;
pub mod aggregate;
pub mod api;
pub mod api_client;
pub mod config;
pub mod device;
pub mod device_api;
pub mod error;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod suffix;
pub mod tracing;
