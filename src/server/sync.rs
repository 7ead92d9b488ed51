//! Coordinator sync rounds.
//!
//! A round holds the registry for its whole duration and runs two passes:
//! every active node is polled for its time first, then every node still
//! active is sent the correction that moves it onto the round average.
//! Polling is sequential. There is no timeout unless one is configured, so a
//! silent node stalls the round (and every registration waiting behind it).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};

use crate::common::clock::TimeService;
use crate::common::duration::{divide_duration, format_duration};
use crate::common::message::NodeRequest;
use crate::common::node::{node_label, Endpoint};
use crate::common::timestamp::{format_timestamp, parse_timestamp};
use crate::server::transport;
use crate::storage::registry::ClientRegistry;

/// Offset of a remote clock derived from one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSample {
    /// Remote clock at `after`, assuming the reply took half the round trip.
    pub estimate: DateTime<Utc>,
    pub offset: TimeDelta,
}

impl OffsetSample {
    pub fn from_exchange(before: DateTime<Utc>, received: DateTime<Utc>, after: DateTime<Utc>) -> Self {
        let estimate = received + divide_duration(after - before, 2);
        Self {
            estimate,
            offset: estimate - after,
        }
    }
}

/// Running sum of in-bounds offsets.
///
/// The count starts at one: the coordinator counts itself as a sample with
/// offset zero, which damps the average toward its own clock.
#[derive(Debug, Clone, Copy)]
pub struct OffsetAccumulator {
    max_offset: TimeDelta,
    sum: TimeDelta,
    count: i32,
}

impl OffsetAccumulator {
    pub fn new(max_offset: TimeDelta) -> Self {
        Self {
            max_offset,
            sum: TimeDelta::zero(),
            count: 1,
        }
    }

    /// Add `offset` if it lies within `[-max_offset, max_offset]`.
    pub fn add(&mut self, offset: TimeDelta) -> bool {
        if offset < -self.max_offset || offset > self.max_offset {
            return false;
        }
        self.sum = self.sum + offset;
        self.count += 1;
        true
    }

    pub fn sum(&self) -> TimeDelta {
        self.sum
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn average(&self) -> TimeDelta {
        divide_duration(self.sum, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub id: String,
    pub endpoint: Endpoint,
    pub offset: TimeDelta,
    pub included: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionReport {
    pub id: String,
    pub endpoint: Endpoint,
    pub delta: TimeDelta,
}

/// What happened during one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub samples: Vec<SampleReport>,
    /// Reached, but the exchange failed. These stay active.
    pub failed: Vec<Endpoint>,
    pub deactivated: Vec<Endpoint>,
    pub corrections: Vec<CorrectionReport>,
    pub average: TimeDelta,
}

impl RoundReport {
    pub fn sample(&self, endpoint: &Endpoint) -> Option<&SampleReport> {
        self.samples.iter().find(|s| &s.endpoint == endpoint)
    }

    pub fn correction(&self, endpoint: &Endpoint) -> Option<&CorrectionReport> {
        self.corrections.iter().find(|c| &c.endpoint == endpoint)
    }
}

enum ExchangeError {
    /// The connection could not be opened.
    Unreachable(anyhow::Error),
    Failed(anyhow::Error),
}

pub struct SyncCoordinator {
    registry: Arc<ClientRegistry>,
    time: Arc<TimeService>,
    max_offset: TimeDelta,
    io_timeout: Option<Duration>,
}

impl SyncCoordinator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        time: Arc<TimeService>,
        max_offset: TimeDelta,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            time,
            max_offset,
            io_timeout,
        }
    }

    /// Run a round every `interval`, forever.
    pub async fn run(&self, interval: Duration) {
        loop {
            log::debug!("[coordinator] Will sync in {:?}", interval);
            tokio::time::sleep(interval).await;
            self.run_round().await;
        }
    }

    pub async fn run_round(&self) -> RoundReport {
        log::info!("[coordinator] Sync:");
        let mut round = self.registry.begin_round().await;
        let mut report = RoundReport::default();

        if round.is_empty() {
            log::info!("[coordinator] No clients to sync!");
            return report;
        }
        log::info!("[coordinator] Time: {}", format_timestamp(self.time.now()));

        let mut accumulator = OffsetAccumulator::new(self.max_offset);

        for index in round.active_indices() {
            let Some(record) = round.get(index) else { continue };
            let (id, endpoint) = (record.id.clone(), record.endpoint.clone());

            let (before, received, after) = match self.poll_time(&endpoint).await {
                Ok(exchange) => exchange,
                Err(ExchangeError::Unreachable(e)) => {
                    log::debug!("[coordinator]{} ERR: {:?}", node_label(&id), e);
                    round.deactivate(index);
                    report.deactivated.push(endpoint);
                    continue;
                }
                Err(ExchangeError::Failed(e)) => {
                    log::warn!("[coordinator]{} ERR: {:?}", node_label(&id), e);
                    report.failed.push(endpoint);
                    continue;
                }
            };
            log::info!("[coordinator]{} Received: {}", node_label(&id), format_timestamp(received));

            let sample = OffsetSample::from_exchange(before, received, after);
            let Some(offset) = round.record_poll(index, sample.estimate, after) else { continue };

            let included = accumulator.add(offset);
            if included {
                log::info!("[coordinator]{} Offset added: {}", node_label(&id), format_duration(offset));
            } else {
                log::info!(
                    "[coordinator]{} Offset ignored. It's beyond {}: {}",
                    node_label(&id),
                    format_duration(self.max_offset),
                    format_duration(offset)
                );
            }
            report.samples.push(SampleReport {
                id,
                endpoint,
                offset,
                included,
            });
        }

        let average = accumulator.average();
        log::debug!(
            "[coordinator] Offsets num: {}, sum: {}, avg: {}",
            accumulator.count(),
            format_duration(accumulator.sum()),
            format_duration(average)
        );

        // Nodes deactivated above drop out here.
        for index in round.active_indices() {
            let Some(record) = round.get(index) else { continue };
            let (id, endpoint) = (record.id.clone(), record.endpoint.clone());
            let delta = average - record.last_offset;

            log::info!("[coordinator]{} Set offset: {}", node_label(&id), format_duration(delta));
            match self.send_correction(&endpoint, delta).await {
                Ok(()) => report.corrections.push(CorrectionReport { id, endpoint, delta }),
                Err(ExchangeError::Unreachable(e)) => {
                    log::debug!("[coordinator]{} ERR: {:?}", node_label(&id), e);
                    round.deactivate(index);
                    report.deactivated.push(endpoint);
                }
                Err(ExchangeError::Failed(e)) => {
                    log::warn!("[coordinator]{} ERR: {:?}", node_label(&id), e);
                    report.failed.push(endpoint);
                }
            }
        }

        log::info!("[coordinator] Set offset: {}", format_duration(average));
        if let Err(e) = self.time.apply_correction(average) {
            log::error!("[coordinator] Failed to apply own offset: {:?}", e);
        }
        report.average = average;
        report
    }

    // (before, received, after)
    async fn poll_time(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>), ExchangeError> {
        let before = self.time.now();
        let mut stream = transport::connect(endpoint, self.io_timeout)
            .await
            .map_err(ExchangeError::Unreachable)?;

        let reply = async {
            transport::write_line(&mut stream, &NodeRequest::GetCurrentTime.encode(), self.io_timeout).await?;
            transport::read_line(&mut stream, self.io_timeout).await
        }
        .await;
        let after = self.time.now();

        let line = reply.map_err(ExchangeError::Failed)?;
        log::debug!("[{}] Receiv time: {:?}", endpoint, line);
        let received = parse_timestamp(&line).map_err(ExchangeError::Failed)?;
        Ok((before, received, after))
    }

    async fn send_correction(&self, endpoint: &Endpoint, delta: TimeDelta) -> Result<(), ExchangeError> {
        let mut stream = transport::connect(endpoint, self.io_timeout)
            .await
            .map_err(ExchangeError::Unreachable)?;
        transport::write_line(&mut stream, &NodeRequest::SetOffset(delta).encode(), self.io_timeout)
            .await
            .with_context(|| format!("failed to send correction to {}", endpoint))
            .map_err(ExchangeError::Failed)
    }
}
