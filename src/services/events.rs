//! Dispatch event fan-out
//!
//! Observers here turn engine callbacks into log lines or channel messages.
//! None of them block; a slow subscriber lags and drops events instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::dispatch::BatchProgress;
use crate::domain::{AuditRecord, DispatchSummary};
use crate::gateway::DispatchObserver;

/// Serializable event for UI and WebSocket subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Started {
        operator_id: String,
        vessel_count: usize,
        at: DateTime<Utc>,
    },
    Progress(BatchProgress),
    Completed(DispatchSummary),
    LockChanged {
        operator_id: String,
        locked: bool,
        at: DateTime<Utc>,
    },
    Audit(AuditRecord),
}

impl DispatchEvent {
    pub fn operator_id(&self) -> &str {
        match self {
            Self::Started { operator_id, .. } | Self::LockChanged { operator_id, .. } => {
                operator_id
            }
            Self::Progress(progress) => &progress.operator_id,
            Self::Completed(summary) => &summary.operator_id,
            Self::Audit(record) => &record.operator_id,
        }
    }
}

/// Publishes every callback on a broadcast channel
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Sized by `notify.event_capacity`
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.event_capacity)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    fn publish(&self, event: DispatchEvent) {
        // No subscribers is not an error
        if self.event_tx.send(event).is_err() {
            debug!("No dispatch event subscribers");
        }
    }
}

impl DispatchObserver for BroadcastObserver {
    fn on_dispatch_start(&self, operator_id: &str, vessel_count: usize) {
        self.publish(DispatchEvent::Started {
            operator_id: operator_id.to_string(),
            vessel_count,
            at: Utc::now(),
        });
    }

    fn on_batch_progress(&self, progress: &BatchProgress) {
        self.publish(DispatchEvent::Progress(progress.clone()));
    }

    fn on_dispatch_complete(&self, summary: &DispatchSummary) {
        self.publish(DispatchEvent::Completed(summary.clone()));
    }

    fn on_lock_status_changed(&self, operator_id: &str, locked: bool) {
        self.publish(DispatchEvent::LockChanged {
            operator_id: operator_id.to_string(),
            locked,
            at: Utc::now(),
        });
    }

    fn on_audit_record(&self, record: &AuditRecord) {
        self.publish(DispatchEvent::Audit(record.clone()));
    }
}

/// Writes progress and audit records as structured log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_batch_progress(&self, progress: &BatchProgress) {
        info!(
            run_id = %progress.run_id,
            operator_id = %progress.operator_id,
            batch = progress.batch_index,
            processed = progress.chunk.processed(),
            departed = progress.chunk.departed,
            failed = progress.chunk.failed,
            fuel_t = progress.reserve.map(|r| r.fuel_t),
            "dispatch batch flushed"
        );
    }

    fn on_audit_record(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "portpilot::audit", "{}", json),
            Err(e) => warn!("Could not serialize audit record {}: {}", record.run_id, e),
        }
    }
}

/// Forwards every callback to each inner observer in order
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl DispatchObserver for FanoutObserver {
    fn on_dispatch_start(&self, operator_id: &str, vessel_count: usize) {
        for observer in &self.observers {
            observer.on_dispatch_start(operator_id, vessel_count);
        }
    }

    fn on_batch_progress(&self, progress: &BatchProgress) {
        for observer in &self.observers {
            observer.on_batch_progress(progress);
        }
    }

    fn on_dispatch_complete(&self, summary: &DispatchSummary) {
        for observer in &self.observers {
            observer.on_dispatch_complete(summary);
        }
    }

    fn on_lock_status_changed(&self, operator_id: &str, locked: bool) {
        for observer in &self.observers {
            observer.on_lock_status_changed(operator_id, locked);
        }
    }

    fn on_audit_record(&self, record: &AuditRecord) {
        for observer in &self.observers {
            observer.on_audit_record(record);
        }
    }
}
