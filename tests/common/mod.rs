#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use clock_sync::common::clock::{ManualClock, TimeService};
use clock_sync::common::node::Endpoint;
use clock_sync::handler::node_request::NodeRequestHandler;
use clock_sync::handler::registration::RegistrationHandler;
use clock_sync::server::transport::{self, ServeOptions};
use clock_sync::storage::registry::ClientRegistry;
use clock_sync::traits::line_handler::LineHandler;
use tokio::net::TcpListener;

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()).unwrap())
}

pub fn time_service(clock: &Arc<ManualClock>, base_offset: TimeDelta) -> Arc<TimeService> {
    Arc::new(TimeService::new(clock.clone(), base_offset).unwrap())
}

pub async fn spawn_handler<H>(handler: H) -> Endpoint
where
    H: LineHandler + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(transport::serve(listener, Arc::new(handler), ServeOptions::default()));
    Endpoint::new("127.0.0.1", port)
}

pub async fn spawn_node(time: Arc<TimeService>) -> Endpoint {
    spawn_handler(NodeRequestHandler::new(time, "[test]")).await
}

pub async fn spawn_coordinator(registry: Arc<ClientRegistry>, time: Arc<TimeService>) -> Endpoint {
    spawn_handler(RegistrationHandler::new(registry, time)).await
}

/// A port nothing is listening on.
pub async fn unused_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new("127.0.0.1", port)
}

/// Corrections are fire-and-forget; poll until the node has applied one.
pub async fn wait_for_offset(time: &TimeService, expected: TimeDelta) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while time.cumulative_offset() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "offset stuck at {} (expected {})",
            time.cumulative_offset(),
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
