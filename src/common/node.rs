use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

/// Network identity of a node. Two records with the same endpoint are the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Log prefix for messages about node `id`.
pub fn node_label(id: impl fmt::Display) -> String {
    format!("[node {}]", id)
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub endpoint: Endpoint,
    pub active: bool,
    /// Coordinator's estimate of the node clock at `last_poll_time`.
    pub last_remote_estimate: Option<DateTime<Utc>>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_offset: TimeDelta,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            active: true,
            last_remote_estimate: None,
            last_poll_time: None,
            last_offset: TimeDelta::zero(),
        }
    }
}
