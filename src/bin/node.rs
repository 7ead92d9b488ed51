use anyhow::Context;
use clock_sync::common::config::load_node_config;
use clock_sync::common::duration::parse_duration;
use clock_sync::node_start;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "config/node".to_string());
    let positional: Vec<&String> = args
        .iter()
        .skip(1)
        .take_while(|a| a.as_str() != "--config")
        .collect();
    let [id, offset] = positional.as_slice() else {
        anyhow::bail!("usage: node <id> <base-offset> [--config <path>]");
    };

    let node_id: u16 = id
        .parse()
        .with_context(|| format!("invalid node id {:?}", id))?;
    let base_offset = parse_duration(offset)?;
    let config = load_node_config(&config_path)?;
    node_start(node_id, base_offset, config).await
}
