use anyhow::Context;
use clock_sync::common::config::load_coordinator_config;
use clock_sync::common::duration::parse_duration;
use clock_sync::coordinator_start;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "config/coordinator".to_string());
    let offset = args
        .get(1)
        .filter(|a| a.as_str() != "--config")
        .context("usage: coordinator <base-offset> [--config <path>]")?;

    let base_offset = parse_duration(offset)?;
    let config = load_coordinator_config(&config_path)?;
    coordinator_start(base_offset, config).await
}
