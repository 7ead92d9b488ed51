use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::common::node::{Endpoint, NodeRecord};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyActive,
    Reactivated,
}

/// Coordinator-side set of known nodes, keyed by endpoint and kept in
/// insertion order. Records are deactivated, never removed.
///
/// A single lock guards the whole collection. A sync round takes it through
/// [`ClientRegistry::begin_round`] and keeps it until the round is over, so
/// registrations wait for the round to finish.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    records: Mutex<IndexMap<Endpoint, NodeRecord>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: &str, endpoint: Endpoint) -> RegisterOutcome {
        let mut records = self.records.lock().await;
        match records.get_mut(&endpoint) {
            Some(record) if record.active => RegisterOutcome::AlreadyActive,
            Some(record) => {
                record.active = true;
                log::info!("Client {} reactivated: {}", record.id, endpoint);
                RegisterOutcome::Reactivated
            }
            None => {
                log::info!("Client {} added: {}", id, endpoint);
                records.insert(endpoint.clone(), NodeRecord::new(id, endpoint));
                RegisterOutcome::Added
            }
        }
    }

    pub async fn deactivate(&self, index: usize) {
        let mut records = self.records.lock().await;
        deactivate_record(&mut records, index);
    }

    /// Active records with their indices, in insertion order.
    pub async fn snapshot_active(&self) -> Vec<(usize, NodeRecord)> {
        let records = self.records.lock().await;
        records
            .values()
            .enumerate()
            .filter(|(_, record)| record.active)
            .map(|(index, record)| (index, record.clone()))
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Take exclusive access for one sync round.
    pub async fn begin_round(&self) -> RegistryRound<'_> {
        RegistryRound {
            records: self.records.lock().await,
        }
    }
}

fn deactivate_record(records: &mut IndexMap<Endpoint, NodeRecord>, index: usize) {
    if let Some((_, record)) = records.get_index_mut(index) {
        if record.active {
            record.active = false;
            log::info!("Client {} deactivated: {}", record.id, record.endpoint);
        }
    }
}

/// Registry access held for the duration of a sync round.
pub struct RegistryRound<'a> {
    records: MutexGuard<'a, IndexMap<Endpoint, NodeRecord>>,
}

impl RegistryRound<'_> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Indices of the records that are active right now.
    pub fn active_indices(&self) -> Vec<usize> {
        self.records
            .values()
            .enumerate()
            .filter(|(_, record)| record.active)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&NodeRecord> {
        self.records.get_index(index).map(|(_, record)| record)
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.get(index).is_some_and(|record| record.active)
    }

    pub fn deactivate(&mut self, index: usize) {
        deactivate_record(&mut self.records, index);
    }

    /// Store a successful poll and return the resulting offset.
    pub fn record_poll(
        &mut self,
        index: usize,
        remote_estimate: DateTime<Utc>,
        poll_time: DateTime<Utc>,
    ) -> Option<TimeDelta> {
        let (_, record) = self.records.get_index_mut(index)?;
        record.last_remote_estimate = Some(remote_estimate);
        record.last_poll_time = Some(poll_time);
        record.last_offset = remote_estimate - poll_time;
        Some(record.last_offset)
    }
}
