pub mod app;
pub mod ble;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod ota;
pub mod update;
mod cli;

pub use app::AppState;

/// Entry point of the `atc-ota` binary
pub async fn run() -> anyhow::Result<()> {
    cli::run().await
}
