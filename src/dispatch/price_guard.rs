//! Route price guard
//!
//! Loss prevention: a departure whose destination pays nothing for every
//! sub-commodity the vessel carries is refused. If the price cannot be read
//! the departure is refused as well.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::{CommodityClass, Rejection, RouteAssignment, VesselId};
use crate::gateway::GameApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceVerdict {
    Priced,
    ZeroPrice,
    CheckFailed,
}

impl PriceVerdict {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Priced => None,
            Self::ZeroPrice => Some(Rejection::ZeroPrice),
            Self::CheckFailed => Some(Rejection::PriceCheckFailed),
        }
    }
}

pub async fn check_route_price(
    api: &dyn GameApi,
    vessel_id: VesselId,
    class: CommodityClass,
    route: &RouteAssignment,
) -> PriceVerdict {
    let prices = match api.route_price(vessel_id, route.route_id).await {
        Ok(prices) => prices,
        Err(e) => {
            warn!(
                "Price check failed for vessel {} on route {}: {}",
                vessel_id, route.route_id, e
            );
            return PriceVerdict::CheckFailed;
        }
    };

    let priced = class
        .sub_commodities()
        .iter()
        .any(|commodity| prices.price(*commodity) > Decimal::ZERO);

    if priced {
        PriceVerdict::Priced
    } else {
        debug!(
            "Vessel {}: zero {} price at {}",
            vessel_id, class, route.destination
        );
        PriceVerdict::ZeroPrice
    }
}
