use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::vessel::SubCommodity;

/// Port demand snapshot.
///
/// Counters are cumulative within the game's demand period and are updated
/// externally as cargo is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub code: String,
    #[serde(default)]
    pub demand: BTreeMap<SubCommodity, i64>,
    #[serde(default)]
    pub consumed: BTreeMap<SubCommodity, i64>,
}

impl Port {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            demand: BTreeMap::new(),
            consumed: BTreeMap::new(),
        }
    }

    pub fn with_demand(mut self, commodity: SubCommodity, demand: i64, consumed: i64) -> Self {
        self.demand.insert(commodity, demand);
        self.consumed.insert(commodity, consumed);
        self
    }
}

/// Operator fuel/CO2/cash balance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reserve {
    pub fuel_t: f64,
    pub co2_t: f64,
    pub cash: Decimal,
    pub max_fuel_t: f64,
    pub max_co2_t: f64,
}

/// Per-commodity unit prices on a route's destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePrices {
    #[serde(default)]
    pub prices: BTreeMap<SubCommodity, Decimal>,
}

impl RoutePrices {
    pub fn price(&self, commodity: SubCommodity) -> Decimal {
        self.prices.get(&commodity).copied().unwrap_or(Decimal::ZERO)
    }
}

/// What the game reports back for a committed departure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartureReceipt {
    pub income: Decimal,
    /// Harbor and transfer fees charged on departure
    pub fee: Decimal,
    pub fuel_used_t: f64,
    pub co2_used_t: f64,
    pub cargo_loaded: u64,
}
