use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::domain::VesselId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelMemoEntry {
    /// Reserve fuel when the pre-check failed (tons)
    pub fuel_level_t: f64,
    pub required_fuel_t: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Vessels known to lack fuel, scoped to one operator.
///
/// Skips repeated fuel pre-checks until the operator's fuel goes up. Any
/// increase clears the whole memo since fuel is shared by every vessel.
#[derive(Debug, Default)]
pub struct FuelFailureMemo {
    entries: HashMap<VesselId, FuelMemoEntry>,
}

impl FuelFailureMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed fuel pre-check
    pub fn put(&mut self, vessel_id: VesselId, fuel_level_t: f64, required_fuel_t: f64) {
        self.entries.insert(
            vessel_id,
            FuelMemoEntry {
                fuel_level_t,
                required_fuel_t,
                recorded_at: Utc::now(),
            },
        );
    }

    /// True iff the vessel was memoized and fuel has not risen above the memoized level
    pub fn should_skip(&self, vessel_id: VesselId, current_fuel_t: f64) -> bool {
        self.entries
            .get(&vessel_id)
            .is_some_and(|entry| current_fuel_t <= entry.fuel_level_t)
    }

    /// Clear everything if `new_fuel_t` exceeds the level recorded in any entry.
    ///
    /// Returns whether the memo was cleared.
    pub fn invalidate_if_increased(&mut self, new_fuel_t: f64) -> bool {
        let increased = self
            .entries
            .values()
            .any(|entry| new_fuel_t > entry.fuel_level_t);

        if increased {
            debug!(
                "Fuel rose to {:.1}t, clearing {} memoized vessel(s)",
                new_fuel_t,
                self.entries.len()
            );
            self.entries.clear();
        }
        increased
    }

    pub fn get(&self, vessel_id: VesselId) -> Option<&FuelMemoEntry> {
        self.entries.get(&vessel_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
