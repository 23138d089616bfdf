//! Command-line interface for axe-swarm.
//!
//! This binary controls and monitors the swarm daemon via the HTTP API.

use anyhow::Result;
use clap::{Parser, Subcommand};

use axe_swarm::action::ActionOutcome;
use axe_swarm::aggregate::SortField;
use axe_swarm::api_client::{self, types::{DeviceState, PassSummary, SettingsPatch, SwarmState, ViewMode}};
use axe_swarm::device_api::DeviceAction;
use axe_swarm::suffix::format_suffixed;

#[derive(Parser)]
#[command(name = "axe-swarm-cli", version, about = "Control the axe-swarm daemon")]
struct Cli {
    /// API base URL
    #[arg(long, env = "AXE_SWARM_API_URL", default_value = api_client::DEFAULT_BASE_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the fleet and its totals
    Status {
        /// Only show devices matching this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Scan the network for miners
    Scan,
    /// Refresh all devices now
    Refresh,
    /// Add a device by IP or hostname
    Add { address: String },
    /// Remove a device
    Remove { address: String },
    /// Restart a device
    Restart { address: String },
    /// Make a device identify itself
    Identify { address: String },
    /// Sort by a field; repeating the active field flips direction
    Sort { field: SortField },
    /// Set the refresh interval in seconds
    Interval { seconds: u32 },
    /// Set the preferred view
    View { mode: ViewMode },
    /// List distinct hardware families
    Families,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = api_client::Client::with_base_url(cli.api_url);

    match cli.command {
        Command::Status { filter } => print_swarm(&client.get_swarm(filter.as_deref()).await?),
        Command::Scan => {
            if client.scan().await?.started {
                println!("Scan started");
            } else {
                println!("A scan or refresh is already running");
            }
        }
        Command::Refresh => {
            if client.refresh().await?.started {
                println!("Refresh started");
            } else {
                println!("Nothing to refresh, or a pass is already running");
            }
        }
        Command::Add { address } => {
            let device = client.add_device(&address).await?;
            println!("Added {} ({})", device.address, device.connection_address);
        }
        Command::Remove { address } => {
            let device = client.remove_device(&address).await?;
            println!("Removed {}", device.address);
        }
        Command::Restart { address } => {
            print_outcome(&address, client.device_action(&address, DeviceAction::Restart).await?)
        }
        Command::Identify { address } => {
            print_outcome(&address, client.device_action(&address, DeviceAction::Identify).await?)
        }
        Command::Sort { field } => {
            let state = client
                .patch_settings(&SettingsPatch {
                    sort: Some(field),
                    ..Default::default()
                })
                .await?;
            print_swarm(&state);
        }
        Command::Interval { seconds } => {
            client
                .patch_settings(&SettingsPatch {
                    refresh_interval: Some(seconds),
                    ..Default::default()
                })
                .await?;
            println!("Refresh interval set to {seconds} s");
        }
        Command::View { mode } => {
            client
                .patch_settings(&SettingsPatch {
                    view: Some(mode),
                    ..Default::default()
                })
                .await?;
            println!("View set to {mode}");
        }
        Command::Families => {
            for family in client.get_families().await? {
                println!(
                    "{:<12} {:<8} x{:<3} {}",
                    family.device_model.as_deref().unwrap_or("-"),
                    family.asic_model.as_deref().unwrap_or("-"),
                    family.asic_count.unwrap_or(0),
                    family.swarm_color.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

fn print_outcome(address: &str, outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Ok { message } => println!("{address}: {message}"),
        ActionOutcome::Timeout => println!("{address}: timed out"),
        ActionOutcome::Failed { error } => println!("{address}: failed: {error}"),
    }
}

fn print_swarm(state: &SwarmState) {
    if state.devices.is_empty() {
        println!("No devices.");
    } else {
        println!(
            "{:<24} {:<16} {:<10} {:>10} {:>8} {:>6} {:>9}  Status",
            "Name", "IP", "Model", "GH/s", "W", "°C", "Best"
        );
        for device in &state.devices {
            print_device(device);
        }
    }

    println!();
    println!(
        "{} devices  {:.2} GH/s  {:.1} W  best {}",
        state.totals.device_count,
        state.totals.hash_rate,
        state.totals.power,
        state.totals.best_diff_display(),
    );

    let mut status = format!(
        "sort {} {}  next refresh in {} s (every {} s)",
        state.sort.field, state.sort.direction, state.countdown, state.refresh_interval
    );
    if state.scanning {
        status.push_str("  [scanning]");
    }
    if state.refreshing {
        status.push_str("  [refreshing]");
    }
    println!("{status}");

    match &state.last_pass {
        Some(PassSummary::Discovery { found, added }) => {
            println!("Last scan: {found} found, {added} new")
        }
        Some(PassSummary::DiscoveryFailed { error }) => println!("Last scan failed: {error}"),
        Some(PassSummary::Refresh { warnings, .. }) => {
            for warning in warnings {
                println!("warning: {warning}");
            }
        }
        None => {}
    }
}

fn print_device(state: &DeviceState) {
    let d = &state.device;
    println!(
        "{:<24} {:<16} {:<10} {:>10.2} {:>8.1} {:>6.1} {:>9}  {}",
        d.short_name(),
        d.connection_address,
        d.device_model.as_deref().unwrap_or("-"),
        d.hash_rate.unwrap_or(0.0),
        d.power.unwrap_or(0.0),
        d.temp.unwrap_or(0.0),
        format_suffixed(d.best_diff_value().unwrap_or(0.0)),
        state
            .notification
            .as_ref()
            .map_or_else(String::new, ToString::to_string),
    );
}
