use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{DispatchOutcome, DispatchTotals, Reserve};
use crate::gateway::{DispatchHooks, DispatchObserver, GameApi};

/// Progress event emitted for each flushed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub run_id: Uuid,
    pub operator_id: String,
    /// 1-based index of this chunk within the run
    pub batch_index: u32,
    /// Outcomes in this chunk; ignored vessels are counted but not listed
    pub outcomes: Vec<DispatchOutcome>,
    pub chunk: DispatchTotals,
    pub lifetime: DispatchTotals,
    /// Reserve read at flush time, `None` when the read failed
    pub reserve: Option<Reserve>,
}

/// Accumulates per-vessel outcomes and flushes them in fixed-size chunks.
///
/// Chunk state is cleared on every flush; lifetime totals are not.
pub struct BatchNotifier {
    run_id: Uuid,
    operator_id: String,
    chunk_size: usize,
    outcomes: Vec<DispatchOutcome>,
    chunk: DispatchTotals,
    lifetime: DispatchTotals,
    flushed: u32,
    last_reserve: Option<Reserve>,
}

impl BatchNotifier {
    pub fn new(run_id: Uuid, operator_id: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            run_id,
            operator_id: operator_id.into(),
            chunk_size: chunk_size.max(1),
            outcomes: Vec::with_capacity(chunk_size),
            chunk: DispatchTotals::default(),
            lifetime: DispatchTotals::default(),
            flushed: 0,
            last_reserve: None,
        }
    }

    pub fn accumulate(&mut self, outcome: &DispatchOutcome) {
        self.chunk.record(outcome);
        self.lifetime.record(outcome);
        if !matches!(outcome, DispatchOutcome::Ignored { .. }) {
            self.outcomes.push(outcome.clone());
        }
    }

    /// The current chunk reached `chunk_size` processed vessels
    pub fn should_flush(&self) -> bool {
        self.chunk.processed() as usize >= self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.processed() == 0
    }

    /// Emit the current chunk, if any. Returns whether a progress event was sent.
    pub async fn flush(
        &mut self,
        api: &dyn GameApi,
        hooks: &dyn DispatchHooks,
        observer: &dyn DispatchObserver,
    ) -> bool {
        if self.is_empty() {
            return false;
        }

        let reserve = match api.reserve(&self.operator_id).await {
            Ok(reserve) => Some(reserve),
            Err(e) => {
                warn!(
                    "Reserve snapshot for batch progress failed ({}): {}",
                    self.operator_id, e
                );
                None
            }
        };

        self.flushed += 1;
        if reserve.is_some() {
            self.last_reserve = reserve;
        }
        let progress = BatchProgress {
            run_id: self.run_id,
            operator_id: self.operator_id.clone(),
            batch_index: self.flushed,
            outcomes: std::mem::take(&mut self.outcomes),
            chunk: std::mem::take(&mut self.chunk),
            lifetime: self.lifetime.clone(),
            reserve,
        };

        debug!(
            "Batch {} for {}: {} processed, {} departed, {} failed",
            progress.batch_index,
            progress.operator_id,
            progress.chunk.processed(),
            progress.chunk.departed,
            progress.chunk.failed
        );

        observer.on_batch_progress(&progress);

        if progress.chunk.departed + progress.chunk.warnings > 0 {
            if let Err(e) = hooks.replenish(&self.operator_id).await {
                warn!("Replenish hook failed after batch: {}", e);
            }
        }

        true
    }

    pub fn lifetime(&self) -> &DispatchTotals {
        &self.lifetime
    }

    /// Most recent successful flush-time reserve read
    pub fn last_reserve(&self) -> Option<&Reserve> {
        self.last_reserve.as_ref()
    }

    /// Number of chunks flushed so far
    pub fn batches(&self) -> u32 {
        self.flushed
    }
}
