//! Batch departure engine
//!
//! `engine` orchestrates a run; the other modules are the pure or
//! single-purpose pieces it is built from.

pub mod batch;
pub mod calculations;
pub mod classify;
pub mod engine;
pub mod fuel_memo;
pub mod price_guard;

pub use batch::{BatchNotifier, BatchProgress};
pub use classify::{classify_transaction_error, TransactionDisposition};
pub use engine::{group_vessels, is_high_fee, DispatchEngine, VesselGroup};
pub use fuel_memo::{FuelFailureMemo, FuelMemoEntry};
pub use price_guard::{check_route_price, PriceVerdict};
