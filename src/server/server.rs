use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use tokio::net::TcpListener;

use crate::common::clock::TimeService;
use crate::common::config::{CoordinatorConfig, NodeConfig};
use crate::common::duration::format_duration;
use crate::common::message::Registration;
use crate::common::node::{node_label, Endpoint};
use crate::handler::node_request::NodeRequestHandler;
use crate::handler::registration::RegistrationHandler;
use crate::server::announcer::Announcer;
use crate::server::sync::SyncCoordinator;
use crate::server::transport::{self, ServeOptions};
use crate::storage::registry::ClientRegistry;

async fn bind(endpoint: &Endpoint) -> Result<TcpListener> {
    TcpListener::bind((endpoint.address.as_str(), endpoint.port))
        .await
        .with_context(|| format!("failed to listen on {}", endpoint))
}

/// Accept registrations and drive sync rounds until the process exits.
pub async fn coordinator_start(base_offset: TimeDelta, config: CoordinatorConfig) -> Result<()> {
    let endpoint = config.endpoint();
    let max_offset = config.max_offset()?;
    let listener = bind(&endpoint).await?;
    log::info!(
        "[coordinator] Launching server on {} with {} offset",
        endpoint,
        format_duration(base_offset)
    );

    let time = Arc::new(TimeService::system(base_offset)?);
    let registry = Arc::new(ClientRegistry::new());

    let handler = Arc::new(RegistrationHandler::new(registry.clone(), time.clone()));
    let options = ServeOptions {
        io_timeout: config.io_timeout(),
        max_connections: config.max_connections,
    };
    tokio::spawn(transport::serve(listener, handler, options));

    let coordinator = SyncCoordinator::new(registry, time, max_offset, config.io_timeout());
    coordinator.run(config.sync_interval()).await;
    Ok(())
}

/// Serve time requests and keep announcing to the coordinator until the process exits.
pub async fn node_start(node_id: u16, base_offset: TimeDelta, config: NodeConfig) -> Result<()> {
    let endpoint = config.listen_endpoint(node_id)?;
    let listener = bind(&endpoint).await?;
    let label = node_label(node_id);
    log::info!(
        "{} Launching client on {} with {} offset",
        label,
        endpoint,
        format_duration(base_offset)
    );

    let time = Arc::new(TimeService::system(base_offset)?);
    let handler = Arc::new(NodeRequestHandler::new(time, label));
    let options = ServeOptions {
        io_timeout: config.io_timeout(),
        max_connections: config.max_connections,
    };
    tokio::spawn(transport::serve(listener, handler, options));

    let announcer = Announcer::new(
        config.coordinator(),
        Registration {
            id: node_id.to_string(),
            endpoint,
        },
        config.announce_interval(),
        config.announce_retry_delay(),
        config.io_timeout(),
    );
    announcer.run().await;
    Ok(())
}
