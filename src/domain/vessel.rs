use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type VesselId = u64;

/// Cargo family a vessel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommodityClass {
    Container,
    Tanker,
}

impl CommodityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Tanker => "tanker",
        }
    }

    /// Sub-commodities a vessel of this class loads
    pub fn sub_commodities(&self) -> &'static [SubCommodity] {
        match self {
            Self::Container => &[SubCommodity::Dry, SubCommodity::Refrigerated],
            Self::Tanker => &[SubCommodity::Fuel, SubCommodity::CrudeOil],
        }
    }
}

impl fmt::Display for CommodityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommodityClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "container" => Ok(Self::Container),
            "tanker" => Ok(Self::Tanker),
            other => Err(format!("unknown commodity class: {other}")),
        }
    }
}

/// Individual cargo kind tracked by ports and vessel holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCommodity {
    Dry,
    Refrigerated,
    Fuel,
    CrudeOil,
}

impl SubCommodity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dry => "dry",
            Self::Refrigerated => "refrigerated",
            Self::Fuel => "fuel",
            Self::CrudeOil => "crude_oil",
        }
    }
}

impl fmt::Display for SubCommodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubCommodity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dry" => Ok(Self::Dry),
            "refrigerated" | "reefer" => Ok(Self::Refrigerated),
            "fuel" => Ok(Self::Fuel),
            "crude_oil" | "crude" => Ok(Self::CrudeOil),
            other => Err(format!("unknown commodity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VesselStatus {
    InPort,
    Anchored,
    Enroute,
    PendingDelivery,
    InMaintenance,
}

impl VesselStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPort => "in_port",
            Self::Anchored => "anchored",
            Self::Enroute => "enroute",
            Self::PendingDelivery => "pending_delivery",
            Self::InMaintenance => "in_maintenance",
        }
    }
}

impl fmt::Display for VesselStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VesselStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "port" | "in_port" => Ok(Self::InPort),
            "anchor" | "anchored" => Ok(Self::Anchored),
            "enroute" => Ok(Self::Enroute),
            "pending" | "pending_delivery" => Ok(Self::PendingDelivery),
            "maintenance" | "in_maintenance" => Ok(Self::InMaintenance),
            other => Err(format!("unknown vessel status: {other}")),
        }
    }
}

/// Route a vessel shuttles on between two ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAssignment {
    pub route_id: u64,
    pub origin: String,
    pub destination: String,
    pub distance_nm: f64,
    /// Speed configured on the route (knots)
    pub speed_kn: f64,
    pub guards: u32,
    pub max_speed_kn: f64,
    /// Fuel requirement reported by the game, when it provides one (tons)
    #[serde(default)]
    pub required_fuel_t: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub id: VesselId,
    pub name: String,
    pub class: CommodityClass,
    /// Max capacity per sub-commodity
    pub capacity: BTreeMap<SubCommodity, u64>,
    pub status: VesselStatus,
    #[serde(default)]
    pub parked: bool,
    pub current_port: String,
    #[serde(default)]
    pub route: Option<RouteAssignment>,
    pub fuel_factor: f64,
}

impl Vessel {
    /// Eligible for a departure attempt: in port, not parked, and selected
    pub fn is_dispatchable(&self) -> bool {
        self.status == VesselStatus::InPort && !self.parked
    }

    /// Port the vessel sails to next.
    ///
    /// A vessel sitting at its route destination heads back to the origin;
    /// anywhere else it heads to the destination.
    pub fn next_destination(&self) -> Option<&str> {
        self.route.as_ref().map(|route| {
            if self.current_port == route.destination {
                route.origin.as_str()
            } else {
                route.destination.as_str()
            }
        })
    }
}
