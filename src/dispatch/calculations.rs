//! Pure calculations used while evaluating a departure
//!
//! Demand, capacity, utilization and fuel requirement live here so the
//! engine and its tests share one definition of each.

use crate::config::SpeedMode;
use crate::domain::{CommodityClass, Port, RouteAssignment, Vessel};

/// Calibration constant for the fuel estimator (kg burned per hour at fuel factor 1.0)
pub const BASE_CONSUMPTION_KG_PER_HOUR: f64 = 1_800.0;

// =============================================================================
// Demand / capacity
// =============================================================================

/// Remaining demand at a port for a commodity class.
///
/// Sum of `demand - consumed` over the class's sub-commodities. Not clamped:
/// a negative value means the game's counters lag behind deliveries.
pub fn remaining_demand(port: &Port, class: CommodityClass) -> i64 {
    class
        .sub_commodities()
        .iter()
        .map(|commodity| {
            let demand = port.demand.get(commodity).copied().unwrap_or(0);
            let consumed = port.consumed.get(commodity).copied().unwrap_or(0);
            demand - consumed
        })
        .sum()
}

/// Total loadable capacity over the vessel class's sub-commodities
pub fn total_capacity(vessel: &Vessel) -> u64 {
    vessel
        .class
        .sub_commodities()
        .iter()
        .filter_map(|commodity| vessel.capacity.get(commodity))
        .sum()
}

/// Fraction of capacity the remaining demand can fill, in `[0, 1]`
pub fn utilization(remaining_demand: i64, capacity: u64) -> f64 {
    if capacity == 0 || remaining_demand <= 0 {
        return 0.0;
    }
    let fillable = (remaining_demand as u64).min(capacity);
    fillable as f64 / capacity as f64
}

// =============================================================================
// Speed / fuel
// =============================================================================

/// Speed to depart at (knots)
pub fn dispatch_speed(route: &RouteAssignment, mode: SpeedMode) -> f64 {
    match mode {
        SpeedMode::RouteDefault => {
            if route.speed_kn > 0.0 {
                route.speed_kn
            } else {
                route.max_speed_kn
            }
        }
        SpeedMode::PercentOfMax { pct } => route.max_speed_kn * pct / 100.0,
    }
}

/// Fuel needed for a departure (tons).
///
/// Uses the game's own figure verbatim when the route carries one, otherwise
/// `distance / speed * fuel_factor * BASE_CONSUMPTION_KG_PER_HOUR / 1000`.
/// A non-positive speed yields infinity so the fuel check rejects the vessel.
pub fn required_fuel(route: &RouteAssignment, fuel_factor: f64, speed_kn: f64) -> f64 {
    if let Some(required) = route.required_fuel_t {
        return required;
    }
    if speed_kn <= 0.0 {
        return f64::INFINITY;
    }
    let hours = route.distance_nm / speed_kn;
    hours * fuel_factor * BASE_CONSUMPTION_KG_PER_HOUR / 1000.0
}
