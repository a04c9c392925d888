//! Per-check records for persistence and telemetry collaborators.

use crate::types::CheckRecord;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fire-and-forget sink for check records. Must not block.
pub trait CheckRecorder: Send + Sync {
    fn record(&self, record: CheckRecord);
}

/// Logs every check at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl CheckRecorder for LogRecorder {
    fn record(&self, record: CheckRecord) {
        debug!(
            probe_id = %record.probe_id,
            request_index = record.request_index,
            success = record.result.success,
            status = record.result.status,
            response_time_ms = record.result.response_time_ms(),
            attempt = record.result.attempt,
            triggered = ?record.triggered_rule_ids,
            "Check recorded"
        );
    }
}

/// Forwards records to a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: mpsc::Sender<CheckRecord>,
}

impl ChannelRecorder {
    pub fn new(tx: mpsc::Sender<CheckRecord>) -> Self {
        Self { tx }
    }
}

impl CheckRecorder for ChannelRecorder {
    fn record(&self, record: CheckRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "Dropping check record");
        }
    }
}
