use std::sync::Arc;

use crate::common::clock::TimeService;
use crate::common::message::{Registration, RegistrationReply, GET_CURRENT_TIME};
use crate::common::timestamp::format_timestamp;
use crate::storage::registry::{ClientRegistry, RegisterOutcome};
use crate::traits::line_handler::LineHandler;

/// The coordinator's listener: node announcements plus time queries.
pub struct RegistrationHandler {
    registry: Arc<ClientRegistry>,
    time: Arc<TimeService>,
}

impl RegistrationHandler {
    pub fn new(registry: Arc<ClientRegistry>, time: Arc<TimeService>) -> Self {
        Self { registry, time }
    }
}

impl LineHandler for RegistrationHandler {
    async fn handle_line(&self, line: &str) -> Option<String> {
        if line == GET_CURRENT_TIME {
            return Some(format_timestamp(self.time.now()));
        }

        let reply = match Registration::parse(line) {
            Ok(registration) => {
                match self.registry.register(&registration.id, registration.endpoint).await {
                    RegisterOutcome::Added | RegisterOutcome::Reactivated => RegistrationReply::Added,
                    RegisterOutcome::AlreadyActive => RegistrationReply::AlreadyExists,
                }
            }
            Err(e) => {
                log::warn!("[coordinator] Rejected registration {:?}: {}", line, e);
                RegistrationReply::Invalid
            }
        };
        Some(reply.as_str().to_string())
    }
}
