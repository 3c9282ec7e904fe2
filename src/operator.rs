//! Per-operator state
//!
//! Everything the engine keeps between runs lives on an `OperatorHandle`:
//! the lock table and the fuel-failure memo. Handles are independent, so two
//! operators never share state or contend on each other's locks.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dispatch::FuelFailureMemo;

/// Operation name used by the dispatch engine
pub const DISPATCH_LOCK: &str = "dispatch";

/// Advisory, non-reentrant, non-queued locks keyed by operation name
#[derive(Debug, Default)]
pub struct LockTable {
    held: DashSet<String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free. Never waits.
    pub fn try_acquire(&self, operation: &str) -> Option<LockGuard<'_>> {
        if self.held.insert(operation.to_string()) {
            debug!("Lock '{}' acquired", operation);
            Some(LockGuard {
                table: self,
                operation: operation.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self, operation: &str) -> bool {
        self.held.contains(operation)
    }
}

/// Releases its lock exactly once, when dropped (including during unwinding)
#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    operation: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.held.remove(&self.operation);
        debug!("Lock '{}' released", self.operation);
    }
}

#[derive(Debug)]
pub struct OperatorHandle {
    operator_id: String,
    locks: LockTable,
    fuel_memo: Mutex<FuelFailureMemo>,
}

impl OperatorHandle {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            locks: LockTable::new(),
            fuel_memo: Mutex::new(FuelFailureMemo::new()),
        }
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn is_dispatching(&self) -> bool {
        self.locks.is_locked(DISPATCH_LOCK)
    }

    pub fn fuel_memo(&self) -> &Mutex<FuelFailureMemo> {
        &self.fuel_memo
    }
}

/// Registry of operator handles, created on first use
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    handles: DashMap<String, Arc<OperatorHandle>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, operator_id: &str) -> Arc<OperatorHandle> {
        self.handles
            .entry(operator_id.to_string())
            .or_insert_with(|| Arc::new(OperatorHandle::new(operator_id)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
