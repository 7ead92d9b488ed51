mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::TimeDelta;
use clock_sync::common::clock::TimeService;
use clock_sync::common::message::GET_CURRENT_TIME;
use clock_sync::common::node::Endpoint;
use clock_sync::common::timestamp::format_timestamp;
use clock_sync::server::sync::{RoundReport, SyncCoordinator};
use clock_sync::server::transport::{self, ServeOptions};
use clock_sync::storage::registry::{ClientRegistry, RegisterOutcome};
use clock_sync::traits::line_handler::LineHandler;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;

use common::{manual_clock, spawn_handler, spawn_node, time_service, unused_endpoint, wait_for_offset};

fn coordinator(registry: &Arc<ClientRegistry>, time: &Arc<TimeService>) -> SyncCoordinator {
    coordinator_with_timeout(registry, time, Duration::from_secs(5))
}

fn coordinator_with_timeout(
    registry: &Arc<ClientRegistry>,
    time: &Arc<TimeService>,
    io_timeout: Duration,
) -> SyncCoordinator {
    SyncCoordinator::new(registry.clone(), time.clone(), TimeDelta::seconds(5), Some(io_timeout))
}

/// Answers every request with something that is not a timestamp.
struct Garbled;

impl LineHandler for Garbled {
    async fn handle_line(&self, _line: &str) -> Option<String> {
        Some("half past nine".to_string())
    }
}

/// Answers one time query, then stops its own listener.
struct Vanishing {
    time: Arc<TimeService>,
    listener: Arc<Mutex<Option<AbortHandle>>>,
}

impl LineHandler for Vanishing {
    async fn handle_line(&self, line: &str) -> Option<String> {
        if line != GET_CURRENT_TIME {
            return None;
        }
        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.abort();
        }
        Some(format_timestamp(self.time.now()))
    }
}

async fn spawn_vanishing(time: Arc<TimeService>) -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let slot = Arc::new(Mutex::new(None));
    let handler = Arc::new(Vanishing {
        time,
        listener: slot.clone(),
    });
    let task = tokio::spawn(transport::serve(listener, handler, ServeOptions::default()));
    *slot.lock().unwrap() = Some(task.abort_handle());
    Endpoint::new("127.0.0.1", port)
}

/// Accepts connections and never says anything.
async fn spawn_silent() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    Endpoint::new("127.0.0.1", port)
}

#[tokio::test]
async fn test_single_node_converges_on_coordinator() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let node_time = time_service(&clock, TimeDelta::seconds(2));
    let node = spawn_node(node_time.clone()).await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("A", node.clone()).await;

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    let sample = report.sample(&node).unwrap();
    assert_eq!(sample.offset, TimeDelta::seconds(2));
    assert!(sample.included);
    // Coordinator counts as the extra sample at zero.
    assert_eq!(report.average, TimeDelta::seconds(1));
    assert_eq!(report.correction(&node).unwrap().delta, TimeDelta::seconds(-1));
    assert_eq!(coordinator_time.cumulative_offset(), TimeDelta::seconds(1));

    wait_for_offset(&node_time, TimeDelta::seconds(-1)).await;
    assert_eq!(node_time.now(), coordinator_time.now());

    let record = &registry.snapshot().await[0];
    assert_eq!(record.last_offset, TimeDelta::seconds(2));
    assert!(record.active);
}

#[tokio::test]
async fn test_outlier_excluded_from_average_but_corrected() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let registry = Arc::new(ClientRegistry::new());

    let mut nodes = Vec::new();
    for (id, skew) in [("1", 1), ("3", 3), ("100", 100)] {
        let time = time_service(&clock, TimeDelta::seconds(skew));
        let endpoint = spawn_node(time.clone()).await;
        registry.register(id, endpoint.clone()).await;
        nodes.push((endpoint, time, TimeDelta::seconds(skew)));
    }

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    let average = TimeDelta::seconds(4) / 3;
    assert_eq!(report.average, average);
    assert!(report.sample(&nodes[0].0).unwrap().included);
    assert!(report.sample(&nodes[1].0).unwrap().included);
    let outlier = report.sample(&nodes[2].0).unwrap();
    assert!(!outlier.included);
    assert_eq!(outlier.offset, TimeDelta::seconds(100));

    for (endpoint, time, skew) in &nodes {
        let delta = average - *skew;
        assert_eq!(report.correction(endpoint).unwrap().delta, delta);
        wait_for_offset(time, delta).await;
        assert_eq!(time.now(), coordinator_time.now());
    }
}

#[tokio::test]
async fn test_unreachable_node_deactivated_and_skipped() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let live_time = time_service(&clock, TimeDelta::seconds(-4));
    let live = spawn_node(live_time.clone()).await;
    let dead = unused_endpoint().await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("dead", dead.clone()).await;
    registry.register("live", live.clone()).await;

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    assert_eq!(report.deactivated, vec![dead.clone()]);
    assert!(report.sample(&dead).is_none());
    assert!(report.correction(&dead).is_none());
    assert_eq!(report.average, TimeDelta::seconds(-2));
    assert_eq!(report.correction(&live).unwrap().delta, TimeDelta::seconds(2));

    let active = registry.snapshot_active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].1.endpoint, live);

    // The next round leaves it alone until it registers again.
    let report = coordinator(&registry, &coordinator_time).run_round().await;
    assert!(report.deactivated.is_empty());
    assert_eq!(registry.register("dead", dead).await, RegisterOutcome::Reactivated);
}

#[tokio::test]
async fn test_bad_reply_keeps_node_active() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let garbled = spawn_handler(Garbled).await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("G", garbled.clone()).await;

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    assert_eq!(report.failed, vec![garbled.clone()]);
    assert!(report.samples.is_empty());
    assert!(report.deactivated.is_empty());
    assert_eq!(report.average, TimeDelta::zero());
    // Still active, so it is still sent a correction.
    assert_eq!(report.correction(&garbled).unwrap().delta, TimeDelta::zero());
    assert_eq!(registry.snapshot_active().await.len(), 1);
}

#[tokio::test]
async fn test_empty_registry_leaves_clock_alone() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::seconds(7));
    let registry = Arc::new(ClientRegistry::new());

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    assert_eq!(report, RoundReport::default());
    assert_eq!(coordinator_time.cumulative_offset(), TimeDelta::zero());
}

#[tokio::test]
async fn test_repeated_rounds_stay_converged() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let a_time = time_service(&clock, TimeDelta::seconds(2));
    let b_time = time_service(&clock, TimeDelta::seconds(-1));
    let a = spawn_node(a_time.clone()).await;
    let b = spawn_node(b_time.clone()).await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("A", a).await;
    registry.register("B", b).await;
    let sync = coordinator(&registry, &coordinator_time);

    let first = sync.run_round().await;
    assert_eq!(first.average, TimeDelta::milliseconds(333) + TimeDelta::nanoseconds(333_333));
    wait_for_offset(&a_time, first.average - TimeDelta::seconds(2)).await;
    wait_for_offset(&b_time, first.average + TimeDelta::seconds(1)).await;

    let second = sync.run_round().await;
    assert_eq!(second.average, TimeDelta::zero());
    assert!(second.samples.iter().all(|s| s.offset == TimeDelta::zero()));
    assert_eq!(a_time.now(), coordinator_time.now());
    assert_eq!(b_time.now(), coordinator_time.now());
}

#[tokio::test]
async fn test_node_gone_before_correction_is_deactivated() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let node = spawn_vanishing(time_service(&clock, TimeDelta::seconds(2))).await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("V", node.clone()).await;

    let report = coordinator(&registry, &coordinator_time).run_round().await;

    assert_eq!(report.sample(&node).unwrap().offset, TimeDelta::seconds(2));
    assert_eq!(report.deactivated, vec![node.clone()]);
    assert!(report.corrections.is_empty());
    // The round still finishes and moves the coordinator.
    assert_eq!(report.average, TimeDelta::seconds(1));
    assert_eq!(coordinator_time.cumulative_offset(), TimeDelta::seconds(1));
    assert!(registry.snapshot_active().await.is_empty());
}

#[tokio::test]
async fn test_silent_node_times_out_and_stays_active() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    let silent = spawn_silent().await;

    let registry = Arc::new(ClientRegistry::new());
    registry.register("S", silent.clone()).await;

    let sync = coordinator_with_timeout(&registry, &coordinator_time, Duration::from_millis(200));
    let report = tokio::time::timeout(Duration::from_secs(5), sync.run_round()).await.unwrap();

    assert_eq!(report.failed, vec![silent.clone()]);
    assert!(report.samples.is_empty());
    assert!(report.deactivated.is_empty());
    assert_eq!(registry.snapshot_active().await.len(), 1);
}

#[tokio::test]
async fn test_connect_timeout_deactivates() {
    let clock = manual_clock();
    let coordinator_time = time_service(&clock, TimeDelta::zero());
    // TEST-NET-1: either never answers or is refused outright.
    let blackhole = Endpoint::new("192.0.2.1", 4850);

    let registry = Arc::new(ClientRegistry::new());
    registry.register("B", blackhole.clone()).await;

    let sync = coordinator_with_timeout(&registry, &coordinator_time, Duration::from_millis(200));
    let report = tokio::time::timeout(Duration::from_secs(5), sync.run_round()).await.unwrap();

    assert_eq!(report.deactivated, vec![blackhole]);
    assert!(report.failed.is_empty());
    assert!(report.corrections.is_empty());
    assert!(registry.snapshot_active().await.is_empty());
}
