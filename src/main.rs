#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("atc-ota {} starting", env!("CARGO_PKG_VERSION"));
    atc_ota_lib::run().await
}
