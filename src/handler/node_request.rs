use std::sync::Arc;

use crate::common::clock::TimeService;
use crate::common::duration::format_duration;
use crate::common::message::NodeRequest;
use crate::common::timestamp::format_timestamp;
use crate::traits::line_handler::LineHandler;

/// Serves `getCurrentTime` and `setOffset` on a node.
pub struct NodeRequestHandler {
    time: Arc<TimeService>,
    label: String,
}

impl NodeRequestHandler {
    pub fn new(time: Arc<TimeService>, label: impl Into<String>) -> Self {
        Self {
            time,
            label: label.into(),
        }
    }
}

impl LineHandler for NodeRequestHandler {
    async fn handle_line(&self, line: &str) -> Option<String> {
        match NodeRequest::parse(line) {
            Ok(NodeRequest::GetCurrentTime) => {
                log::info!("{} Request: getCurrentTime", self.label);
                Some(format_timestamp(self.time.now()))
            }
            Ok(NodeRequest::SetOffset(delta)) => {
                log::info!("{} Request: setOffset {}", self.label, format_duration(delta));
                if let Err(e) = self.time.apply_correction(delta) {
                    log::warn!("{} Failed to apply offset: {:?}", self.label, e);
                }
                None
            }
            Err(e) => {
                log::warn!("{} Invalid request {:?}: {}", self.label, line, e);
                None
            }
        }
    }
}
