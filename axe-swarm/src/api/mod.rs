//! HTTP API served by the swarm daemon.

pub mod commands;
mod server;
mod v0;

pub use server::{SharedState, router, serve};
