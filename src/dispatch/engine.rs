use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch::BatchNotifier;
use super::calculations::{
    dispatch_speed, remaining_demand, required_fuel, total_capacity, utilization,
};
use super::classify::{classify_transaction_error, TransactionDisposition};
use super::price_guard::check_route_price;
use crate::config::DispatchConfig;
use crate::domain::{
    AuditRecord, CommodityClass, Departure, DepartureReceipt, DispatchOutcome, DispatchPhase,
    DispatchReason, DispatchSummary, IgnoreReason, Port, Rejection, TransactionFailure, Vessel,
    VesselId, VesselStatus, WarningKind,
};
use crate::error::{PilotError, Result};
use crate::gateway::{DispatchHooks, DispatchObserver, GameApi, NoopHooks, NoopObserver};
use crate::operator::{OperatorHandle, DISPATCH_LOCK};

/// Eligible vessels sharing a next destination and commodity class
#[derive(Debug, Clone)]
pub struct VesselGroup {
    pub destination: Option<String>,
    pub class: CommodityClass,
    /// Largest capacity first
    pub vessels: Vec<Vessel>,
}

/// Partition vessels by `(next destination, class)` and order each group by
/// descending capacity, so the largest vessels consume shared demand first.
pub fn group_vessels(vessels: Vec<Vessel>) -> Vec<VesselGroup> {
    let mut groups: BTreeMap<(Option<String>, CommodityClass), Vec<Vessel>> = BTreeMap::new();
    for vessel in vessels {
        let key = (vessel.next_destination().map(str::to_string), vessel.class);
        groups.entry(key).or_default().push(vessel);
    }

    groups
        .into_iter()
        .map(|((destination, class), mut vessels)| {
            vessels.sort_by(|a, b| {
                total_capacity(b)
                    .cmp(&total_capacity(a))
                    .then(a.id.cmp(&b.id))
            });
            VesselGroup {
                destination,
                class,
                vessels,
            }
        })
        .collect()
}

/// Working state trusted for the remainder of a run
struct RunLedger {
    /// Reserve fuel, reduced by each departure's reported usage
    fuel_t: f64,
    /// Remaining demand of the group being processed
    demand: Option<i64>,
}

/// Lock-protected orchestrator for batch departures
pub struct DispatchEngine {
    api: Arc<dyn GameApi>,
    hooks: Arc<dyn DispatchHooks>,
    observer: Arc<dyn DispatchObserver>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(api: Arc<dyn GameApi>, config: DispatchConfig) -> Self {
        Self {
            api,
            hooks: Arc::new(NoopHooks),
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn DispatchHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run one dispatch pass for an operator.
    ///
    /// Returns immediately with `dispatch_in_progress` if another pass holds
    /// the operator's lock. Otherwise the lock is held for the whole pass and
    /// released on every exit path, including errors and panics.
    pub async fn dispatch(
        &self,
        operator: &OperatorHandle,
        vessel_ids: Option<&HashSet<VesselId>>,
    ) -> DispatchSummary {
        let operator_id = operator.operator_id();

        let Some(guard) = operator.locks().try_acquire(DISPATCH_LOCK) else {
            info!("Dispatch already running for {}, skipping", operator_id);
            return DispatchSummary::rejected(operator_id, DispatchReason::DispatchInProgress);
        };
        self.observer.on_lock_status_changed(operator_id, true);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        debug!(
            "Dispatch {} for {}: {} -> {}",
            run_id,
            operator_id,
            DispatchPhase::Idle,
            DispatchPhase::LockAcquired
        );

        let outcome = AssertUnwindSafe(self.run(operator, run_id, started_at, vessel_ids))
            .catch_unwind()
            .await;

        let mut summary = match outcome {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                error!("Dispatch {} for {} failed: {}", run_id, operator_id, e);
                errored_summary(run_id, operator_id, started_at)
            }
            Err(payload) => {
                error!(
                    "Dispatch {} for {} panicked: {}",
                    run_id,
                    operator_id,
                    panic_message(payload.as_ref())
                );
                errored_summary(run_id, operator_id, started_at)
            }
        };
        summary.finished_at = Utc::now();

        drop(guard);
        self.observer.on_lock_status_changed(operator_id, false);
        self.observer.on_dispatch_complete(&summary);
        self.observer
            .on_audit_record(&AuditRecord::from_summary(&summary));

        info!(
            "Dispatch {} for {} finished: {} departed, {} failed, {} warnings, net {}",
            run_id,
            operator_id,
            summary.totals.departed,
            summary.totals.failed,
            summary.totals.warnings,
            summary.totals.net_income
        );

        summary
    }

    async fn run(
        &self,
        operator: &OperatorHandle,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        vessel_ids: Option<&HashSet<VesselId>>,
    ) -> Result<DispatchSummary> {
        let operator_id = operator.operator_id();
        let mut phase = DispatchPhase::LockAcquired;
        let mut summary = DispatchSummary::new(run_id, operator_id, started_at);

        if let Err(e) = self.hooks.before_run(operator_id).await {
            warn!("Pre-dispatch hook failed for {}: {}", operator_id, e);
        }

        let reserve = self.api.reserve(operator_id).await?;
        operator
            .fuel_memo()
            .lock()
            .await
            .invalidate_if_increased(reserve.fuel_t);
        advance(&mut phase, DispatchPhase::ReserveChecked, operator_id);

        if reserve.fuel_t < self.config.min_fuel_threshold_t {
            warn!(
                "Reserve fuel {:.1}t below minimum {:.1}t for {}, not dispatching",
                reserve.fuel_t, self.config.min_fuel_threshold_t, operator_id
            );
            advance(&mut phase, DispatchPhase::Aborted, operator_id);
            summary.success = false;
            summary.reason = Some(DispatchReason::InsufficientFuel);
            return Ok(summary);
        }

        let fleet = self.api.fleet(operator_id).await?;
        let eligible: Vec<Vessel> = fleet
            .into_iter()
            .filter(|v| v.is_dispatchable())
            .filter(|v| vessel_ids.map_or(true, |ids| ids.contains(&v.id)))
            .collect();

        if eligible.is_empty() {
            info!("No vessels ready to depart for {}", operator_id);
            advance(&mut phase, DispatchPhase::Completed, operator_id);
            summary.reason = Some(DispatchReason::NoUnits);
            return Ok(summary);
        }

        info!(
            "Dispatching {} vessel(s) for {} (fuel {:.1}t)",
            eligible.len(),
            operator_id,
            reserve.fuel_t
        );
        self.observer.on_dispatch_start(operator_id, eligible.len());

        advance(&mut phase, DispatchPhase::Grouping, operator_id);
        let groups = group_vessels(eligible);

        // One snapshot for the whole run; demand is not re-read mid-run
        let ports: HashMap<String, Port> = self
            .api
            .assigned_ports(operator_id)
            .await?
            .into_iter()
            .map(|port| (port.code.clone(), port))
            .collect();

        advance(&mut phase, DispatchPhase::PerUnitLoop, operator_id);
        let mut notifier = BatchNotifier::new(run_id, operator_id, self.config.chunk_size);
        let mut ledger = RunLedger {
            fuel_t: reserve.fuel_t,
            demand: None,
        };

        for group in groups {
            let port = group.destination.as_deref().and_then(|code| ports.get(code));
            ledger.demand = port.map(|p| remaining_demand(p, group.class));

            for vessel in &group.vessels {
                let outcome = self
                    .evaluate(operator, vessel, group.destination.as_deref(), &mut ledger)
                    .await;

                notifier.accumulate(&outcome);
                summary.record(outcome);

                if notifier.should_flush() {
                    notifier
                        .flush(self.api.as_ref(), self.hooks.as_ref(), self.observer.as_ref())
                        .await;
                    if let Some(snapshot) = notifier.last_reserve() {
                        operator
                            .fuel_memo()
                            .lock()
                            .await
                            .invalidate_if_increased(snapshot.fuel_t);
                    }
                }
            }
        }

        advance(&mut phase, DispatchPhase::Flushing, operator_id);
        notifier
            .flush(self.api.as_ref(), self.hooks.as_ref(), self.observer.as_ref())
            .await;
        summary.batches = notifier.batches();

        if summary.totals.departed + summary.totals.warnings > 0 {
            if let Err(e) = self.hooks.replenish(operator_id).await {
                warn!("Replenish hook failed for {}: {}", operator_id, e);
            }
            if let Err(e) = self.hooks.refresh(operator_id).await {
                warn!("Refresh hook failed for {}: {}", operator_id, e);
            }
        }

        advance(&mut phase, DispatchPhase::Completed, operator_id);
        Ok(summary)
    }

    /// Evaluate one vessel and, if every check passes, depart it.
    ///
    /// Checks short-circuit on the first failure and fail closed.
    async fn evaluate(
        &self,
        operator: &OperatorHandle,
        vessel: &Vessel,
        destination: Option<&str>,
        ledger: &mut RunLedger,
    ) -> DispatchOutcome {
        let failed = |reason: Rejection| {
            debug!("Vessel {} ({}) rejected: {}", vessel.id, vessel.name, reason);
            DispatchOutcome::Failed {
                vessel_id: vessel.id,
                vessel_name: vessel.name.clone(),
                reason,
            }
        };
        let ignored = |reason: IgnoreReason| DispatchOutcome::Ignored {
            vessel_id: vessel.id,
            vessel_name: vessel.name.clone(),
            reason,
        };

        let cached = {
            let memo = operator.fuel_memo().lock().await;
            if memo.should_skip(vessel.id, ledger.fuel_t) {
                memo.get(vessel.id).map(|entry| entry.required_fuel_t)
            } else {
                None
            }
        };
        if let Some(required_t) = cached {
            return failed(Rejection::InsufficientFuel {
                cached: true,
                required_t,
                available_t: ledger.fuel_t,
            });
        }

        let (Some(route), Some(destination), Some(demand)) =
            (vessel.route.as_ref(), destination, ledger.demand)
        else {
            return failed(Rejection::PortUnknown);
        };

        if demand <= 0 {
            return failed(Rejection::NoDemand);
        }

        let verdict = check_route_price(self.api.as_ref(), vessel.id, vessel.class, route).await;
        if let Some(rejection) = verdict.rejection() {
            return failed(rejection);
        }

        let capacity = total_capacity(vessel);
        let fill = utilization(demand, capacity);
        if fill < self.config.min_utilization {
            return failed(Rejection::LowUtilization { utilization: fill });
        }

        let speed_kn = dispatch_speed(route, self.config.speed_mode);
        let guards = route.guards;

        let required_t = required_fuel(route, vessel.fuel_factor, speed_kn);
        if ledger.fuel_t < required_t {
            operator
                .fuel_memo()
                .lock()
                .await
                .put(vessel.id, ledger.fuel_t, required_t);
            return failed(Rejection::InsufficientFuel {
                cached: false,
                required_t,
                available_t: ledger.fuel_t,
            });
        }

        match self.api.vessel_status(vessel.id).await {
            Ok(Some(status)) if status != VesselStatus::InPort => {
                debug!(
                    "Vessel {} is {} before departure, skipping",
                    vessel.id, status
                );
                return ignored(IgnoreReason::AlreadyDeparted);
            }
            Ok(_) => {}
            Err(e) => warn!("Live status check failed for vessel {}: {}", vessel.id, e),
        }

        if self.config.dry_run {
            info!(
                "[DRY RUN] Would depart {} ({}) to {} at {:.1}kn, {} guard(s)",
                vessel.name, vessel.id, destination, speed_kn, guards
            );
            return ignored(IgnoreReason::DryRun);
        }

        let operator_id = operator.operator_id();
        let contribution_before = self.read_contribution(operator_id).await;

        let limit = Duration::from_millis(self.config.transaction_timeout_ms);
        let receipt = match timeout(limit, self.api.depart_vessel(vessel.id, speed_kn, guards))
            .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                let message = match e {
                    PilotError::Transaction(raw) => raw,
                    other => other.to_string(),
                };
                return match classify_transaction_error(&message) {
                    TransactionDisposition::AlreadyDeparted => {
                        debug!("Vessel {} already departed elsewhere", vessel.id);
                        ignored(IgnoreReason::AlreadyDeparted)
                    }
                    TransactionDisposition::Anomaly => ignored(IgnoreReason::RouteAnomaly),
                    TransactionDisposition::Failure(failure) => {
                        warn!("Departure of vessel {} failed: {}", vessel.id, message);
                        failed(Rejection::TransactionError { failure })
                    }
                };
            }
            Err(_) => {
                warn!(
                    "Departure of vessel {} timed out after {}ms",
                    vessel.id, self.config.transaction_timeout_ms
                );
                return failed(Rejection::TransactionError {
                    failure: TransactionFailure::Timeout,
                });
            }
        };

        let contribution_after = self.read_contribution(operator_id).await;
        let contribution_delta = contribution_before
            .zip(contribution_after)
            .map(|(before, after)| after - before);

        ledger.fuel_t -= receipt.fuel_used_t;
        if let Some(demand) = ledger.demand.as_mut() {
            let loaded = i64::try_from(receipt.cargo_loaded).unwrap_or(i64::MAX);
            *demand = demand.saturating_sub(loaded);
        }

        let departure = self.build_departure(vessel, destination, &receipt, contribution_delta);

        if receipt.income.is_zero() && receipt.fee.is_zero() {
            warn!(
                "Vessel {} departed with no income and no fee, demand exhausted",
                vessel.id
            );
            return DispatchOutcome::Warning {
                departure,
                reason: WarningKind::DemandExhausted,
            };
        }

        info!(
            "Departed {} ({}) to {}: income {}, fee {}, fuel {:.1}t{}",
            vessel.name,
            vessel.id,
            destination,
            departure.income,
            departure.fee,
            departure.fuel_used_t,
            if departure.high_fee { " [HIGH FEE]" } else { "" }
        );
        DispatchOutcome::Departed(departure)
    }

    fn build_departure(
        &self,
        vessel: &Vessel,
        destination: &str,
        receipt: &DepartureReceipt,
        contribution_delta: Option<i64>,
    ) -> Departure {
        let net_income = receipt.income - receipt.fee;
        Departure {
            vessel_id: vessel.id,
            vessel_name: vessel.name.clone(),
            destination: destination.to_string(),
            income: receipt.income,
            fee: receipt.fee,
            net_income,
            fuel_used_t: receipt.fuel_used_t,
            co2_used_t: receipt.co2_used_t,
            cargo_loaded: receipt.cargo_loaded,
            contribution_delta,
            high_fee: is_high_fee(receipt.income, receipt.fee, self.config.high_fee_pct),
        }
    }

    async fn read_contribution(&self, operator_id: &str) -> Option<i64> {
        match self.api.contribution(operator_id).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Contribution read failed for {}: {}", operator_id, e);
                None
            }
        }
    }
}

/// Fee above `high_fee_pct` percent of income, or a loss-making departure
pub fn is_high_fee(income: Decimal, fee: Decimal, high_fee_pct: f64) -> bool {
    let pct = Decimal::from_f64(high_fee_pct).unwrap_or(Decimal::ZERO);
    let threshold = income * pct / Decimal::ONE_HUNDRED;
    fee > threshold || income - fee < Decimal::ZERO
}

fn advance(phase: &mut DispatchPhase, next: DispatchPhase, operator_id: &str) {
    debug_assert!(
        phase.can_transition_to(next),
        "invalid dispatch transition {} -> {}",
        phase,
        next
    );
    debug!("Dispatch for {}: {} -> {}", operator_id, phase, next);
    *phase = next;
}

fn errored_summary(run_id: Uuid, operator_id: &str, started_at: DateTime<Utc>) -> DispatchSummary {
    let mut summary = DispatchSummary::new(run_id, operator_id, started_at);
    summary.success = false;
    summary.reason = Some(DispatchReason::Error);
    summary
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
