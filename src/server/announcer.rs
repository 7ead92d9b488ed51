use std::time::Duration;

use anyhow::Result;

use crate::common::message::{Registration, RegistrationReply};
use crate::common::node::{node_label, Endpoint};
use crate::server::transport;

/// Keeps a node registered with the coordinator.
pub struct Announcer {
    coordinator: Endpoint,
    registration: Registration,
    interval: Duration,
    retry_delay: Duration,
    io_timeout: Option<Duration>,
}

impl Announcer {
    pub fn new(
        coordinator: Endpoint,
        registration: Registration,
        interval: Duration,
        retry_delay: Duration,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            coordinator,
            registration,
            interval,
            retry_delay,
            io_timeout,
        }
    }

    /// One announcement attempt. Fails only if no reply line came back; a
    /// reply that is not one of the known answers counts as `Invalid`.
    pub async fn announce_once(&self) -> Result<RegistrationReply> {
        let line = transport::request(&self.coordinator, &self.registration.encode(), self.io_timeout).await?;
        Ok(RegistrationReply::parse(&line).unwrap_or_else(|e| {
            log::warn!("{} {:?}", node_label(&self.registration.id), e);
            RegistrationReply::Invalid
        }))
    }

    /// Retry with a fixed delay until the coordinator answers with any line.
    pub async fn announce_until_acknowledged(&self) -> RegistrationReply {
        let label = node_label(&self.registration.id);
        log::debug!("{} Announcing to server...", label);
        loop {
            match self.announce_once().await {
                Ok(reply) => {
                    match reply {
                        RegistrationReply::Added => log::info!("{} Announced to server", label),
                        RegistrationReply::AlreadyExists => log::debug!("{} Already announced", label),
                        RegistrationReply::Invalid => {
                            log::warn!("{} Server rejected announcement {:?}", label, self.registration.encode())
                        }
                    }
                    return reply;
                }
                Err(e) => {
                    log::debug!("{} Announce to {} failed: {:?}", label, self.coordinator, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    pub async fn run(&self) {
        loop {
            self.announce_until_acknowledged().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
