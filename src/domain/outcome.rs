use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::vessel::VesselId;

/// Why a run ended without (or before) processing vessels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    DispatchInProgress,
    InsufficientFuel,
    NoUnits,
    Error,
}

impl DispatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DispatchInProgress => "dispatch_in_progress",
            Self::InsufficientFuel => "insufficient_fuel",
            Self::NoUnits => "no_units",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized category of a failed departure transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransactionFailure {
    InsufficientFuel,
    InsufficientCo2,
    InsufficientCash,
    InMaintenance,
    RouteUnavailable,
    RateLimited,
    Timeout,
    /// No known category matched; keeps the raw error text
    Other(String),
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientFuel => write!(f, "not enough fuel"),
            Self::InsufficientCo2 => write!(f, "not enough CO2 certificates"),
            Self::InsufficientCash => write!(f, "not enough cash"),
            Self::InMaintenance => write!(f, "vessel in maintenance"),
            Self::RouteUnavailable => write!(f, "route unavailable"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Timeout => write!(f, "transaction timed out"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Per-vessel rejection; accumulates into the failed bucket and never aborts a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    PortUnknown,
    NoDemand,
    ZeroPrice,
    PriceCheckFailed,
    LowUtilization { utilization: f64 },
    InsufficientFuel { cached: bool, required_t: f64, available_t: f64 },
    TransactionError { failure: TransactionFailure },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PortUnknown => "port_unknown",
            Self::NoDemand => "no_demand",
            Self::ZeroPrice => "zero_price",
            Self::PriceCheckFailed => "price_check_failed",
            Self::LowUtilization { .. } => "low_utilization",
            Self::InsufficientFuel { .. } => "insufficient_fuel",
            Self::TransactionError { .. } => "transaction_error",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortUnknown => write!(f, "destination port unknown"),
            Self::NoDemand => write!(f, "no remaining demand"),
            Self::ZeroPrice => write!(f, "destination price is zero"),
            Self::PriceCheckFailed => write!(f, "could not verify destination price"),
            Self::LowUtilization { utilization } => {
                write!(f, "utilization {:.1}% below minimum", utilization * 100.0)
            }
            Self::InsufficientFuel {
                cached,
                required_t,
                available_t,
            } => {
                write!(
                    f,
                    "insufficient fuel: need {:.1}t, have {:.1}t",
                    required_t, available_t
                )?;
                if *cached {
                    write!(f, " (cached)")?;
                }
                Ok(())
            }
            Self::TransactionError { failure } => write!(f, "{}", failure),
        }
    }
}

/// Outcomes that are dropped without being counted as failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Another trigger departed the vessel first
    AlreadyDeparted,
    /// Destination-price or emission-only anomaly reported by the game
    RouteAnomaly,
    /// Evaluation passed but dry-run mode suppressed the transaction
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DemandExhausted,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DemandExhausted => write!(f, "demand exhausted mid-batch"),
        }
    }
}

/// A committed departure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departure {
    pub vessel_id: VesselId,
    pub vessel_name: String,
    pub destination: String,
    pub income: Decimal,
    pub fee: Decimal,
    pub net_income: Decimal,
    pub fuel_used_t: f64,
    pub co2_used_t: f64,
    pub cargo_loaded: u64,
    /// Change in operator contribution across the departure, when both reads succeeded
    pub contribution_delta: Option<i64>,
    pub high_fee: bool,
}

/// Result of evaluating one vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Departed(Departure),
    Failed {
        vessel_id: VesselId,
        vessel_name: String,
        reason: Rejection,
    },
    Warning {
        departure: Departure,
        reason: WarningKind,
    },
    Ignored {
        vessel_id: VesselId,
        vessel_name: String,
        reason: IgnoreReason,
    },
}

impl DispatchOutcome {
    pub fn vessel_id(&self) -> VesselId {
        match self {
            Self::Departed(departure) => departure.vessel_id,
            Self::Warning { departure, .. } => departure.vessel_id,
            Self::Failed { vessel_id, .. } | Self::Ignored { vessel_id, .. } => *vessel_id,
        }
    }

    /// A departure transaction was committed (including anomalous ones)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Departed(_) | Self::Warning { .. })
    }

    pub fn departure(&self) -> Option<&Departure> {
        match self {
            Self::Departed(departure) | Self::Warning { departure, .. } => Some(departure),
            _ => None,
        }
    }
}

/// Aggregates over a set of outcomes (a chunk or a whole run)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchTotals {
    pub departed: u32,
    pub failed: u32,
    pub warnings: u32,
    pub ignored: u32,
    pub income: Decimal,
    pub fees: Decimal,
    pub net_income: Decimal,
    pub fuel_used_t: f64,
    pub co2_used_t: f64,
    pub cargo_loaded: u64,
    pub contribution_delta: i64,
    pub high_fee: u32,
}

impl DispatchTotals {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Departed(_) => self.departed += 1,
            DispatchOutcome::Warning { .. } => self.warnings += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::Ignored { .. } => self.ignored += 1,
        }

        if let Some(departure) = outcome.departure() {
            self.income += departure.income;
            self.fees += departure.fee;
            self.net_income += departure.net_income;
            self.fuel_used_t += departure.fuel_used_t;
            self.co2_used_t += departure.co2_used_t;
            self.cargo_loaded = self.cargo_loaded.saturating_add(departure.cargo_loaded);
            self.contribution_delta += departure.contribution_delta.unwrap_or(0);
            if departure.high_fee {
                self.high_fee += 1;
            }
        }
    }

    pub fn processed(&self) -> u32 {
        self.departed + self.failed + self.warnings + self.ignored
    }
}

/// Coarse classification consumers present to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Nothing was attempted
    HardFailure,
    /// Some vessels failed
    PartialSuccess,
    /// Everything departed but at least one departure was anomalous
    SuccessWithWarning,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedVessel {
    pub vessel_id: VesselId,
    pub vessel_name: String,
    pub reason: Rejection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarnedVessel {
    pub departure: Departure,
    pub reason: WarningKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredVessel {
    pub vessel_id: VesselId,
    pub vessel_name: String,
    pub reason: IgnoreReason,
}

/// Final report of one dispatch invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub run_id: Uuid,
    pub operator_id: String,
    pub success: bool,
    pub reason: Option<DispatchReason>,
    pub departed: Vec<Departure>,
    pub failed: Vec<FailedVessel>,
    pub warnings: Vec<WarnedVessel>,
    pub ignored: Vec<IgnoredVessel>,
    pub totals: DispatchTotals,
    pub batches: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DispatchSummary {
    pub fn new(run_id: Uuid, operator_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            operator_id: operator_id.into(),
            success: true,
            reason: None,
            departed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
            ignored: Vec::new(),
            totals: DispatchTotals::default(),
            batches: 0,
            started_at,
            finished_at: started_at,
        }
    }

    /// Summary for a run that stopped before touching any vessel
    pub fn rejected(operator_id: impl Into<String>, reason: DispatchReason) -> Self {
        let now = Utc::now();
        let mut summary = Self::new(Uuid::new_v4(), operator_id, now);
        summary.success = reason == DispatchReason::NoUnits;
        summary.reason = Some(reason);
        summary
    }

    /// File an outcome into exactly one bucket
    pub fn record(&mut self, outcome: DispatchOutcome) {
        self.totals.record(&outcome);
        match outcome {
            DispatchOutcome::Departed(departure) => self.departed.push(departure),
            DispatchOutcome::Warning { departure, reason } => {
                self.warnings.push(WarnedVessel { departure, reason })
            }
            DispatchOutcome::Failed {
                vessel_id,
                vessel_name,
                reason,
            } => self.failed.push(FailedVessel {
                vessel_id,
                vessel_name,
                reason,
            }),
            DispatchOutcome::Ignored {
                vessel_id,
                vessel_name,
                reason,
            } => self.ignored.push(IgnoredVessel {
                vessel_id,
                vessel_name,
                reason,
            }),
        }
    }

    pub fn outcome_class(&self) -> OutcomeClass {
        if !self.success {
            OutcomeClass::HardFailure
        } else if !self.failed.is_empty() {
            OutcomeClass::PartialSuccess
        } else if !self.warnings.is_empty() {
            OutcomeClass::SuccessWithWarning
        } else {
            OutcomeClass::Success
        }
    }

    /// Every vessel id that received an outcome, in bucket order
    pub fn vessel_ids(&self) -> Vec<VesselId> {
        self.departed
            .iter()
            .map(|d| d.vessel_id)
            .chain(self.failed.iter().map(|f| f.vessel_id))
            .chain(self.warnings.iter().map(|w| w.departure.vessel_id))
            .chain(self.ignored.iter().map(|i| i.vessel_id))
            .collect()
    }
}

/// Per-run record handed to the audit persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: Uuid,
    pub operator_id: String,
    pub success: bool,
    pub reason: Option<DispatchReason>,
    pub departed: Vec<VesselId>,
    pub failed: Vec<(VesselId, String)>,
    pub totals: DispatchTotals,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_summary(summary: &DispatchSummary) -> Self {
        Self {
            run_id: summary.run_id,
            operator_id: summary.operator_id.clone(),
            success: summary.success,
            reason: summary.reason,
            departed: summary
                .departed
                .iter()
                .map(|d| d.vessel_id)
                .chain(summary.warnings.iter().map(|w| w.departure.vessel_id))
                .collect(),
            failed: summary
                .failed
                .iter()
                .map(|f| (f.vessel_id, f.reason.code().to_string()))
                .collect(),
            totals: summary.totals.clone(),
            started_at: summary.started_at,
            finished_at: summary.finished_at,
        }
    }
}
