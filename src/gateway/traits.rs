use async_trait::async_trait;

use crate::dispatch::BatchProgress;
use crate::domain::{
    AuditRecord, DepartureReceipt, DispatchSummary, Port, Reserve, RoutePrices, Vessel, VesselId,
    VesselStatus,
};
use crate::error::Result;

/// Transactional game API the dispatch engine reads from and commits to.
///
/// Every method is a suspension point; implementations own their own
/// transport, retries and credentials.
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn fleet(&self, operator_id: &str) -> Result<Vec<Vessel>>;

    /// Ports assigned to the operator's routes, fetched once per run
    async fn assigned_ports(&self, operator_id: &str) -> Result<Vec<Port>>;

    async fn route_price(&self, vessel_id: VesselId, route_id: u64) -> Result<RoutePrices>;

    async fn reserve(&self, operator_id: &str) -> Result<Reserve>;

    /// Commit an irreversible departure.
    ///
    /// An `Err` carries the game's failure text; the engine classifies it.
    async fn depart_vessel(
        &self,
        vessel_id: VesselId,
        speed_kn: f64,
        guards: u32,
    ) -> Result<DepartureReceipt>;

    async fn contribution(&self, operator_id: &str) -> Result<i64>;

    /// Live status read just before departing. `None` means the backend
    /// cannot tell, and the departure proceeds.
    async fn vessel_status(&self, _vessel_id: VesselId) -> Result<Option<VesselStatus>> {
        Ok(None)
    }
}

/// Injectable pre/post hooks around a dispatch run.
///
/// Hook errors are logged and never abort a run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DispatchHooks: Send + Sync {
    async fn before_run(&self, _operator_id: &str) -> Result<()> {
        Ok(())
    }

    /// Top up fuel/CO2 after departures spent some
    async fn replenish(&self, operator_id: &str) -> Result<()>;

    /// Ask downstream consumers to reload operator state
    async fn refresh(&self, operator_id: &str) -> Result<()>;
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl DispatchHooks for NoopHooks {
    async fn replenish(&self, _operator_id: &str) -> Result<()> {
        Ok(())
    }

    async fn refresh(&self, _operator_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Notification sink for UI and chat collaborators.
///
/// Methods are synchronous and must not block: implementations hand events
/// off to channels or spawned tasks.
pub trait DispatchObserver: Send + Sync {
    fn on_dispatch_start(&self, _operator_id: &str, _vessel_count: usize) {}

    fn on_batch_progress(&self, _progress: &BatchProgress) {}

    fn on_dispatch_complete(&self, _summary: &DispatchSummary) {}

    fn on_lock_status_changed(&self, _operator_id: &str, _locked: bool) {}

    fn on_audit_record(&self, _record: &AuditRecord) {}
}

/// Observer that drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}
