use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Serialize;

use crate::app::AppState;
use crate::ble::BleCentral;
use crate::commands;
use crate::config::{source_keys, DeviceSettings, Settings};
use crate::device::{InMemoryDirectory, MacAddress};
use crate::update::ReleaseResolver;

#[derive(Parser)]
#[command(name = "atc-ota")]
#[command(author, version, about = "Firmware updates for ATC MiThermometer sensors")]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Firmware source for devices not listed in the settings file
    #[arg(short, long, default_value = "pvvx")]
    source: String,

    /// Seconds to scan for advertisements before running the command
    #[arg(long, default_value = "10")]
    scan_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll installed and latest firmware versions
    Check {
        /// Device MAC address; all configured devices when omitted
        mac: Option<String>,
    },

    /// Read the firmware version running on a device
    CurrentVersion {
        mac: String,
    },

    /// Show a release of a firmware source
    Release {
        /// Source key (pvvx, atc1441)
        source: String,

        /// Release tag; latest when omitted
        tag: Option<String>,
    },

    /// Flash a specific firmware version
    Apply {
        mac: String,

        /// Release tag, e.g. v4.5
        version: String,
    },

    /// Flash the latest firmware release
    Install {
        mac: String,
    },

    /// List nearby sensors that are not configured
    Discover,

    /// Poll configured devices until interrupted
    Watch,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn open_central(scan_secs: u64) -> Result<Arc<dyn BleCentral>> {
    let central = crate::ble::BtleCentral::new()
        .await
        .context("Failed to open Bluetooth adapter")?;
    central.scan(std::time::Duration::from_secs(scan_secs)).await?;
    Ok(Arc::new(central))
}

#[cfg(not(feature = "bluetooth"))]
async fn open_central(_scan_secs: u64) -> Result<Arc<dyn BleCentral>> {
    log::warn!("Built without the `bluetooth` feature; no devices will be reachable");
    Ok(Arc::new(crate::ble::mock::MockCentral::new()))
}

/// Set up `mac`, using the default source when it is not in the settings file
async fn ensure_device(state: &AppState, mac: &str, source: &str) -> Result<MacAddress> {
    let mac = MacAddress::parse(mac)?;
    if state.manager.get_entry(&mac).await.is_none() {
        state
            .setup_device(&DeviceSettings {
                mac_address: mac.to_string(),
                firmware_source: source.to_string(),
            })
            .await?;
    }
    Ok(mac)
}

/// Application state with configured devices set up
async fn open_state(settings: Settings, scan_secs: u64) -> Result<AppState> {
    let central = open_central(scan_secs).await?;
    let state = AppState::new(settings, central, Arc::new(InMemoryDirectory::new()));
    state.setup_configured_devices().await;
    Ok(state)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Release { source, tag } => {
            let resolver = ReleaseResolver::new(Client::new(), settings.release);
            let release = match tag {
                Some(tag) => resolver.by_tag(&source, &tag).await,
                None => resolver.latest(&source).await,
            };
            let Some(release) = release else {
                bail!(
                    "No release found for source '{}' (known sources: {})",
                    source,
                    source_keys().join(", ")
                );
            };
            print_json(&release)?;
        }
        Commands::Check { mac } => {
            let state = open_state(settings, cli.scan_secs).await?;
            let macs = match mac {
                Some(mac) => vec![ensure_device(&state, &mac, &cli.source).await?],
                None => state.manager.get_entries().await.into_iter().map(|e| e.mac).collect(),
            };
            for mac in macs {
                match commands::check_for_update(&state, &mac).await {
                    Ok(snapshot) => print_json(&*snapshot)?,
                    Err(e) => log::error!("{}: {}", mac, e),
                }
            }
        }
        Commands::CurrentVersion { mac } => {
            let state = open_state(settings, cli.scan_secs).await?;
            let mac = MacAddress::parse(&mac)?;
            match commands::current_version(&state, &mac).await {
                Some(version) => println!("{}", version),
                None => bail!("Could not determine the firmware version of {}", mac),
            }
        }
        Commands::Apply { mac, version } => {
            let state = open_state(settings, cli.scan_secs).await?;
            let mac = ensure_device(&state, &mac, &cli.source).await?;
            let device_id = commands::device_id_for(&state, &mac)
                .await
                .context("Device has no directory record")?;
            let outcome = commands::apply_firmware(&state, &device_id, &version).await?;
            print_json(&outcome)?;
        }
        Commands::Install { mac } => {
            let state = open_state(settings, cli.scan_secs).await?;
            let mac = ensure_device(&state, &mac, &cli.source).await?;
            commands::install_update(&state, &mac).await?;
            println!("Firmware installed on {}", mac);
        }
        Commands::Discover => {
            let state = open_state(settings, cli.scan_secs).await?;
            print_json(&commands::discover_devices(&state).await)?;
        }
        Commands::Watch => {
            let state = open_state(settings, cli.scan_secs).await?;
            if state.manager.get_entries().await.is_empty() {
                bail!("No devices configured; add them to the settings file");
            }
            state.start_polling().await;
            tokio::signal::ctrl_c().await?;
            state.shutdown().await;
        }
    }

    Ok(())
}
