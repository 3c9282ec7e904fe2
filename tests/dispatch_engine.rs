use async_trait::async_trait;
use portpilot::config::DispatchConfig;
use portpilot::dispatch::{BatchProgress, DispatchEngine};
use portpilot::domain::{
    AuditRecord, CommodityClass, DepartureReceipt, DispatchReason,
    DispatchSummary, IgnoreReason, OutcomeClass, Port, Rejection, Reserve, RouteAssignment,
    RoutePrices, SubCommodity, TransactionFailure, Vessel, VesselId, VesselStatus, WarningKind,
};
use portpilot::error::{PilotError, Result};
use portpilot::gateway::{DispatchHooks, DispatchObserver, GameApi};
use portpilot::operator::OperatorHandle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Clone)]
enum DepartScript {
    Receipt(DepartureReceipt),
    Error(String),
    Hang,
}

struct FakeGame {
    fleet: Vec<Vessel>,
    ports: Vec<Port>,
    zero_price: HashSet<VesselId>,
    price_errors: HashSet<VesselId>,
    scripts: HashMap<VesselId, DepartScript>,
    live_status: HashMap<VesselId, VesselStatus>,
    fuel_t: Mutex<f64>,
    reserve_fails: AtomicBool,
    panic_on_fleet: AtomicBool,
    /// When set, `fleet()` parks until notified
    fleet_gate: Option<Arc<Notify>>,
    fleet_entered: Arc<Notify>,
    reserve_reads: AtomicU32,
    departures: Mutex<Vec<VesselId>>,
    contribution: AtomicI64,
    /// Reserve fuel after any departure, as if topped up by the game
    refuel_on_departure: Option<f64>,
}

impl FakeGame {
    fn new(fleet: Vec<Vessel>, ports: Vec<Port>) -> Self {
        Self {
            fleet,
            ports,
            zero_price: HashSet::new(),
            price_errors: HashSet::new(),
            scripts: HashMap::new(),
            live_status: HashMap::new(),
            fuel_t: Mutex::new(5_000.0),
            reserve_fails: AtomicBool::new(false),
            panic_on_fleet: AtomicBool::new(false),
            fleet_gate: None,
            fleet_entered: Arc::new(Notify::new()),
            reserve_reads: AtomicU32::new(0),
            departures: Mutex::new(Vec::new()),
            contribution: AtomicI64::new(100),
            refuel_on_departure: None,
        }
    }

    fn with_fuel(self, fuel_t: f64) -> Self {
        self.set_fuel(fuel_t);
        self
    }

    fn with_script(mut self, vessel_id: VesselId, script: DepartScript) -> Self {
        self.scripts.insert(vessel_id, script);
        self
    }

    fn set_fuel(&self, fuel_t: f64) {
        *self.fuel_t.lock().unwrap() = fuel_t;
    }

    fn departures(&self) -> Vec<VesselId> {
        self.departures.lock().unwrap().clone()
    }

    fn capacity_of(&self, vessel_id: VesselId) -> u64 {
        self.fleet
            .iter()
            .find(|v| v.id == vessel_id)
            .map(|v| v.capacity.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GameApi for FakeGame {
    async fn fleet(&self, _: &str) -> Result<Vec<Vessel>> {
        if self.panic_on_fleet.load(Ordering::SeqCst) {
            panic!("fleet payload corrupted");
        }
        self.fleet_entered.notify_one();
        if let Some(gate) = &self.fleet_gate {
            gate.notified().await;
        }
        Ok(self.fleet.clone())
    }

    async fn assigned_ports(&self, _: &str) -> Result<Vec<Port>> {
        Ok(self.ports.clone())
    }

    async fn route_price(&self, vessel_id: VesselId, _: u64) -> Result<RoutePrices> {
        if self.price_errors.contains(&vessel_id) {
            return Err(PilotError::Timeout("price endpoint".to_string()));
        }
        let price = if self.zero_price.contains(&vessel_id) {
            Decimal::ZERO
        } else {
            dec!(12.5)
        };
        let mut prices = BTreeMap::new();
        prices.insert(SubCommodity::Dry, price);
        prices.insert(SubCommodity::Fuel, price);
        Ok(RoutePrices { prices })
    }

    async fn reserve(&self, _: &str) -> Result<Reserve> {
        self.reserve_reads.fetch_add(1, Ordering::SeqCst);
        if self.reserve_fails.load(Ordering::SeqCst) {
            return Err(PilotError::Api {
                method: "GET".to_string(),
                path: "/reserve".to_string(),
                status: 503,
                body: "maintenance window".to_string(),
            });
        }
        Ok(Reserve {
            fuel_t: *self.fuel_t.lock().unwrap(),
            co2_t: 1_000.0,
            cash: dec!(2500000),
            max_fuel_t: 10_000.0,
            max_co2_t: 10_000.0,
        })
    }

    async fn depart_vessel(
        &self,
        vessel_id: VesselId,
        _speed_kn: f64,
        _guards: u32,
    ) -> Result<DepartureReceipt> {
        self.departures.lock().unwrap().push(vessel_id);
        if let Some(fuel_t) = self.refuel_on_departure {
            self.set_fuel(fuel_t);
        }
        match self.scripts.get(&vessel_id).cloned() {
            Some(DepartScript::Receipt(receipt)) => Ok(receipt),
            Some(DepartScript::Error(message)) => Err(PilotError::Transaction(message)),
            Some(DepartScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(PilotError::Transaction("too late".to_string()))
            }
            None => {
                self.contribution.fetch_add(3, Ordering::SeqCst);
                Ok(DepartureReceipt {
                    income: dec!(1000),
                    fee: dec!(100),
                    fuel_used_t: 10.0,
                    co2_used_t: 2.0,
                    cargo_loaded: self.capacity_of(vessel_id),
                })
            }
        }
    }

    async fn contribution(&self, _: &str) -> Result<i64> {
        Ok(self.contribution.load(Ordering::SeqCst))
    }

    async fn vessel_status(&self, vessel_id: VesselId) -> Result<Option<VesselStatus>> {
        Ok(self.live_status.get(&vessel_id).copied())
    }
}

#[derive(Default)]
struct CountingHooks {
    before: AtomicU32,
    replenish: AtomicU32,
    refresh: AtomicU32,
}

#[async_trait]
impl DispatchHooks for CountingHooks {
    async fn before_run(&self, _: &str) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Err(PilotError::Internal("pre-run hook is flaky".to_string()))
    }

    async fn replenish(&self, _: &str) -> Result<()> {
        self.replenish.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh(&self, _: &str) -> Result<()> {
        self.refresh.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Lock(bool),
    Start(usize),
    Progress(u32),
    Complete,
    Audit,
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Seen>>,
    progress: Mutex<Vec<BatchProgress>>,
    summaries: Mutex<Vec<DispatchSummary>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl DispatchObserver for Recorder {
    fn on_dispatch_start(&self, _: &str, vessel_count: usize) {
        self.seen.lock().unwrap().push(Seen::Start(vessel_count));
    }

    fn on_batch_progress(&self, progress: &BatchProgress) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Progress(progress.chunk.processed()));
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn on_dispatch_complete(&self, summary: &DispatchSummary) {
        self.seen.lock().unwrap().push(Seen::Complete);
        self.summaries.lock().unwrap().push(summary.clone());
    }

    fn on_lock_status_changed(&self, _: &str, locked: bool) {
        self.seen.lock().unwrap().push(Seen::Lock(locked));
    }

    fn on_audit_record(&self, _: &AuditRecord) {
        self.seen.lock().unwrap().push(Seen::Audit);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn container(id: VesselId, dry: u64) -> Vessel {
    let mut capacity = BTreeMap::new();
    capacity.insert(SubCommodity::Dry, dry);
    Vessel {
        id,
        name: format!("Vessel {id}"),
        class: CommodityClass::Container,
        capacity,
        status: VesselStatus::InPort,
        parked: false,
        current_port: "rotterdam".to_string(),
        route: Some(RouteAssignment {
            route_id: 1000 + id,
            origin: "rotterdam".to_string(),
            destination: "singapore".to_string(),
            distance_nm: 8_000.0,
            speed_kn: 20.0,
            guards: 0,
            max_speed_kn: 24.0,
            required_fuel_t: Some(50.0),
        }),
        fuel_factor: 1.0,
    }
}

fn singapore(dry_demand: i64) -> Port {
    Port::new("singapore").with_demand(SubCommodity::Dry, dry_demand, 0)
}

struct Harness {
    game: Arc<FakeGame>,
    hooks: Arc<CountingHooks>,
    recorder: Arc<Recorder>,
    engine: DispatchEngine,
    operator: OperatorHandle,
}

fn harness(game: FakeGame, config: DispatchConfig) -> Harness {
    let game = Arc::new(game);
    let hooks = Arc::new(CountingHooks::default());
    let recorder = Arc::new(Recorder::default());
    let engine = DispatchEngine::new(game.clone(), config)
        .with_hooks(hooks.clone())
        .with_observer(recorder.clone());
    Harness {
        game,
        hooks,
        recorder,
        engine,
        operator: OperatorHandle::new("op-1"),
    }
}

fn assert_unique_buckets(summary: &DispatchSummary) {
    let ids = summary.vessel_ids();
    let unique: HashSet<VesselId> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len(), "vessel filed twice: {:?}", ids);
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_successful_run_departs_and_releases_lock() {
    let h = harness(
        FakeGame::new(vec![container(1, 400), container(2, 300)], vec![singapore(2_000)]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(summary.success);
    assert_eq!(summary.reason, None);
    assert_eq!(summary.departed.len(), 2);
    assert_eq!(summary.outcome_class(), OutcomeClass::Success);
    assert_eq!(summary.totals.net_income, dec!(1800));
    assert_eq!(summary.totals.fuel_used_t, 20.0);
    // Largest vessel first
    assert_eq!(h.game.departures(), vec![1, 2]);
    assert_eq!(summary.departed[0].contribution_delta, Some(3));
    assert!(!h.operator.is_dispatching());

    assert_eq!(h.hooks.before.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.refresh.load(Ordering::SeqCst), 1);
    // Once after the flush, once after the run
    assert_eq!(h.hooks.replenish.load(Ordering::SeqCst), 2);

    assert_eq!(
        h.recorder.seen(),
        vec![
            Seen::Lock(true),
            Seen::Start(2),
            Seen::Progress(2),
            Seen::Lock(false),
            Seen::Complete,
            Seen::Audit,
        ]
    );
    tokio_test::assert_ok!(serde_json::to_string(&summary));
}

#[tokio::test]
async fn test_panic_in_pipeline_releases_lock_and_reports_error() {
    let game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]);
    game.panic_on_fleet.store(true, Ordering::SeqCst);
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(!summary.success);
    assert_eq!(summary.reason, Some(DispatchReason::Error));
    assert_eq!(summary.outcome_class(), OutcomeClass::HardFailure);
    assert!(!h.operator.is_dispatching());
    assert_eq!(h.recorder.summaries.lock().unwrap().len(), 1);
    assert!(h.recorder.seen().contains(&Seen::Lock(false)));

    // The operator is usable again
    h.game.panic_on_fleet.store(false, Ordering::SeqCst);
    let retry = h.engine.dispatch(&h.operator, None).await;
    assert!(retry.success);
    assert_eq!(retry.departed.len(), 1);
}

#[tokio::test]
async fn test_api_error_reports_error_and_releases_lock() {
    let game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]);
    game.reserve_fails.store(true, Ordering::SeqCst);
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(!summary.success);
    assert_eq!(summary.reason, Some(DispatchReason::Error));
    assert!(h.game.departures().is_empty());
    assert!(!h.operator.is_dispatching());
}

#[tokio::test]
async fn test_concurrent_dispatch_is_rejected_without_transactions() {
    let gate = Arc::new(Notify::new());
    let mut game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]);
    game.fleet_gate = Some(gate.clone());
    let entered = game.fleet_entered.clone();
    let h = harness(game, DispatchConfig::default());

    let first = h.engine.dispatch(&h.operator, None);
    let second = async {
        // First run is now parked inside the lock
        entered.notified().await;
        assert!(h.operator.is_dispatching());
        let summary = h.engine.dispatch(&h.operator, None).await;
        let departures_during_conflict = h.game.departures().len();
        gate.notify_one();
        (summary, departures_during_conflict)
    };

    let (first, (second, departures_during_conflict)) = tokio::join!(first, second);

    assert!(!second.success);
    assert_eq!(second.reason, Some(DispatchReason::DispatchInProgress));
    assert!(second.vessel_ids().is_empty());
    assert_eq!(departures_during_conflict, 0);

    assert!(first.success);
    assert_eq!(first.departed.len(), 1);
    assert_eq!(h.game.departures(), vec![1]);
    assert!(!h.operator.is_dispatching());
}

#[tokio::test]
async fn test_insufficient_reserve_fuel_aborts_before_any_vessel() {
    let h = harness(
        FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]).with_fuel(5.0),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(!summary.success);
    assert_eq!(summary.reason, Some(DispatchReason::InsufficientFuel));
    assert!(h.game.departures().is_empty());
    assert!(summary.vessel_ids().is_empty());
    assert_eq!(h.hooks.replenish.load(Ordering::SeqCst), 0);
    assert!(!h.operator.is_dispatching());
}

#[tokio::test]
async fn test_low_utilization_is_rejected() {
    // 40 of 400 is 10%, under the 30% floor
    let h = harness(
        FakeGame::new(vec![container(1, 400)], vec![singapore(40)]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(summary.success);
    assert_eq!(summary.outcome_class(), OutcomeClass::PartialSuccess);
    assert!(h.game.departures().is_empty());
    match &summary.failed[0].reason {
        Rejection::LowUtilization { utilization } => assert!((utilization - 0.10).abs() < 1e-9),
        other => panic!("unexpected rejection {other:?}"),
    }
    // Nothing departed, nothing to replenish
    assert_eq!(h.hooks.replenish.load(Ordering::SeqCst), 0);
    assert_eq!(h.hooks.refresh.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_group_demand_is_consumed_by_earlier_departures() {
    // Two 500-unit vessels chasing 600 units: the second is left with 100 (20%)
    let h = harness(
        FakeGame::new(vec![container(1, 500), container(2, 500)], vec![singapore(600)]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(summary.departed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].vessel_id, 2);
    assert!(matches!(
        summary.failed[0].reason,
        Rejection::LowUtilization { .. }
    ));
}

#[tokio::test]
async fn test_forty_five_units_flush_in_three_chunks() {
    let fleet: Vec<Vessel> = (1..=45).map(|id| container(id, 10)).collect();
    let h = harness(
        FakeGame::new(fleet, vec![singapore(100_000)]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(summary.departed.len(), 45);
    assert_eq!(summary.batches, 3);

    let progress = h.recorder.progress.lock().unwrap();
    let sizes: Vec<u32> = progress.iter().map(|p| p.chunk.processed()).collect();
    assert_eq!(sizes, vec![20, 20, 5]);
    assert!(progress.iter().all(|p| p.reserve.is_some()));
    assert_eq!(progress[2].lifetime.processed(), 45);
    assert_eq!(
        progress.iter().map(|p| p.batch_index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    // One read for the run plus one per flush
    assert_eq!(h.game.reserve_reads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_every_vessel_lands_in_exactly_one_bucket() {
    let mut no_route = container(3, 300);
    no_route.route = None;

    let mut game = FakeGame::new(
        vec![
            container(1, 900),
            container(2, 800),
            no_route,
            container(4, 600),
            container(5, 500),
            container(6, 400),
            container(7, 350),
        ],
        vec![singapore(100_000)],
    )
    .with_script(
        4,
        DepartScript::Error("Vessel has already departed".to_string()),
    )
    .with_script(
        5,
        DepartScript::Receipt(DepartureReceipt {
            income: Decimal::ZERO,
            fee: Decimal::ZERO,
            fuel_used_t: 5.0,
            co2_used_t: 1.0,
            cargo_loaded: 0,
        }),
    )
    .with_script(
        6,
        DepartScript::Error("Error: insufficient funds for harbor fee".to_string()),
    );
    game.zero_price.insert(2);
    game.price_errors.insert(7);
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_unique_buckets(&summary);
    assert_eq!(summary.vessel_ids().len(), 7);
    assert_eq!(summary.totals.processed(), 7);

    assert_eq!(summary.departed.len(), 1);
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(summary.warnings[0].reason, WarningKind::DemandExhausted);
    assert_eq!(summary.ignored.len(), 1);
    assert_eq!(summary.ignored[0].reason, IgnoreReason::AlreadyDeparted);

    let reasons: HashMap<VesselId, &Rejection> = summary
        .failed
        .iter()
        .map(|f| (f.vessel_id, &f.reason))
        .collect();
    assert_eq!(reasons[&2], &Rejection::ZeroPrice);
    assert_eq!(reasons[&3], &Rejection::PortUnknown);
    assert_eq!(reasons[&7], &Rejection::PriceCheckFailed);
    assert_eq!(
        reasons[&6],
        &Rejection::TransactionError {
            failure: TransactionFailure::InsufficientCash
        }
    );
    assert_eq!(summary.outcome_class(), OutcomeClass::PartialSuccess);
}

#[tokio::test]
async fn test_fuel_memo_skips_until_fuel_rises() {
    let mut thirsty = container(1, 400);
    if let Some(route) = thirsty.route.as_mut() {
        route.required_fuel_t = Some(100.0);
    }
    let h = harness(
        FakeGame::new(vec![thirsty], vec![singapore(2_000)]).with_fuel(60.0),
        DispatchConfig::default(),
    );

    let first = h.engine.dispatch(&h.operator, None).await;
    assert!(matches!(
        first.failed[0].reason,
        Rejection::InsufficientFuel { cached: false, .. }
    ));
    assert_eq!(h.operator.fuel_memo().lock().await.len(), 1);

    let second = h.engine.dispatch(&h.operator, None).await;
    assert!(matches!(
        second.failed[0].reason,
        Rejection::InsufficientFuel { cached: true, .. }
    ));

    h.game.set_fuel(150.0);
    let third = h.engine.dispatch(&h.operator, None).await;
    assert_eq!(third.departed.len(), 1);
    assert!(h.operator.fuel_memo().lock().await.is_empty());
}

#[tokio::test]
async fn test_dry_run_issues_no_transactions() {
    let config = DispatchConfig {
        dry_run: true,
        ..DispatchConfig::default()
    };
    let h = harness(
        FakeGame::new(vec![container(1, 400), container(2, 400)], vec![singapore(2_000)]),
        config,
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(h.game.departures().is_empty());
    assert_eq!(summary.ignored.len(), 2);
    assert!(summary
        .ignored
        .iter()
        .all(|i| i.reason == IgnoreReason::DryRun));
    assert_eq!(h.hooks.refresh.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_vessel_filter_and_eligibility() {
    let mut parked = container(2, 400);
    parked.parked = true;
    let mut at_sea = container(3, 400);
    at_sea.status = VesselStatus::Enroute;

    let h = harness(
        FakeGame::new(
            vec![container(1, 400), parked, at_sea, container(4, 400)],
            vec![singapore(10_000)],
        ),
        DispatchConfig::default(),
    );

    let only = HashSet::from([4, 2]);
    let summary = h.engine.dispatch(&h.operator, Some(&only)).await;
    assert_eq!(h.game.departures(), vec![4]);
    assert_eq!(summary.vessel_ids(), vec![4]);

    let none_eligible = HashSet::from([2, 3]);
    let summary = h.engine.dispatch(&h.operator, Some(&none_eligible)).await;
    assert!(summary.success);
    assert_eq!(summary.reason, Some(DispatchReason::NoUnits));
}

#[tokio::test]
async fn test_live_status_check_skips_vessel_that_left() {
    let mut game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]);
    game.live_status.insert(1, VesselStatus::Enroute);
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(h.game.departures().is_empty());
    assert_eq!(summary.ignored[0].reason, IgnoreReason::AlreadyDeparted);
}

#[tokio::test]
async fn test_transaction_timeout_becomes_failure_and_loop_continues() {
    let config = DispatchConfig {
        transaction_timeout_ms: 20,
        ..DispatchConfig::default()
    };
    let game = FakeGame::new(vec![container(1, 400), container(2, 300)], vec![singapore(2_000)])
        .with_script(1, DepartScript::Hang);
    let h = harness(game, config);

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(
        summary.failed[0].reason,
        Rejection::TransactionError {
            failure: TransactionFailure::Timeout
        }
    );
    assert_eq!(summary.departed.len(), 1);
    assert_eq!(summary.departed[0].vessel_id, 2);
}

#[tokio::test]
async fn test_high_fee_departure_is_flagged() {
    let game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]).with_script(
        1,
        DepartScript::Receipt(DepartureReceipt {
            income: dec!(1000),
            fee: dec!(400),
            fuel_used_t: 10.0,
            co2_used_t: 2.0,
            cargo_loaded: 400,
        }),
    );
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    let departure = &summary.departed[0];
    assert!(departure.high_fee);
    assert_eq!(departure.net_income, dec!(600));
    assert_eq!(summary.totals.high_fee, 1);
    // Fake only bumps contribution on its default receipt
    assert_eq!(departure.contribution_delta, Some(0));
}

#[tokio::test]
async fn test_tanker_and_container_groups_are_independent() {
    let mut tanker = container(9, 700);
    tanker.class = CommodityClass::Tanker;
    tanker.capacity = BTreeMap::from([(SubCommodity::Fuel, 700)]);

    let port = Port::new("singapore")
        .with_demand(SubCommodity::Dry, 400, 0)
        .with_demand(SubCommodity::Fuel, 1_000, 200);
    let h = harness(
        FakeGame::new(vec![container(1, 400), tanker], vec![port]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    // Container demand does not drain tanker demand
    assert_eq!(summary.departed.len(), 2);
    assert!(summary.failed.is_empty());
}

#[tokio::test]
async fn test_consumed_demand_rejects_with_no_demand() {
    // 150 consumed against 100 demanded leaves nothing to carry
    let port = Port::new("singapore").with_demand(SubCommodity::Dry, 100, 150);
    let h = harness(
        FakeGame::new(vec![container(1, 400)], vec![port]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(h.game.departures().is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].reason, Rejection::NoDemand);
}

#[tokio::test]
async fn test_route_to_port_outside_snapshot_is_port_unknown() {
    let mut lost = container(2, 400);
    if let Some(route) = lost.route.as_mut() {
        route.destination = "zz".to_string();
    }
    let h = harness(
        FakeGame::new(vec![container(1, 400), lost], vec![singapore(2_000)]),
        DispatchConfig::default(),
    );

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(h.game.departures(), vec![1]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].vessel_id, 2);
    assert_eq!(summary.failed[0].reason, Rejection::PortUnknown);
}

#[tokio::test]
async fn test_destination_price_anomaly_is_ignored() {
    let game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]).with_script(
        1,
        DepartScript::Error("Destination price anomaly on route".to_string()),
    );
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert!(summary.failed.is_empty());
    assert_eq!(summary.ignored.len(), 1);
    assert_eq!(summary.ignored[0].reason, IgnoreReason::RouteAnomaly);
    // Nothing committed, so nothing to replenish
    assert_eq!(h.hooks.refresh.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unclassified_failure_keeps_raw_game_text() {
    let game = FakeGame::new(vec![container(1, 400)], vec![singapore(2_000)]).with_script(
        1,
        DepartScript::Error("Harbor closed for the festival".to_string()),
    );
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(
        summary.failed[0].reason,
        Rejection::TransactionError {
            failure: TransactionFailure::Other("Harbor closed for the festival".to_string())
        }
    );
}

#[tokio::test]
async fn test_oversized_cargo_report_exhausts_group_demand() {
    let game = FakeGame::new(
        vec![container(1, 500), container(2, 400)],
        vec![singapore(100_000)],
    )
    .with_script(
        1,
        DepartScript::Receipt(DepartureReceipt {
            income: dec!(1000),
            fee: dec!(100),
            fuel_used_t: 10.0,
            co2_used_t: 2.0,
            cargo_loaded: u64::MAX,
        }),
    );
    let h = harness(game, DispatchConfig::default());

    let summary = h.engine.dispatch(&h.operator, None).await;

    assert_eq!(h.game.departures(), vec![1]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].vessel_id, 2);
    assert_eq!(summary.failed[0].reason, Rejection::NoDemand);
}

#[tokio::test]
async fn test_fuel_rise_seen_at_flush_clears_memo() {
    let mut thirsty = container(1, 400);
    if let Some(route) = thirsty.route.as_mut() {
        route.required_fuel_t = Some(100.0);
    }
    let mut frugal = container(2, 500);
    if let Some(route) = frugal.route.as_mut() {
        route.required_fuel_t = Some(10.0);
    }

    let mut game = FakeGame::new(vec![thirsty, frugal], vec![singapore(2_000)]).with_fuel(60.0);
    game.refuel_on_departure = Some(500.0);
    let config = DispatchConfig {
        chunk_size: 1,
        ..DispatchConfig::default()
    };
    let h = harness(game, config);

    // Memoize vessel 1 at 60t
    let only_thirsty = HashSet::from([1]);
    let first = h.engine.dispatch(&h.operator, Some(&only_thirsty)).await;
    assert!(matches!(
        first.failed[0].reason,
        Rejection::InsufficientFuel { cached: false, .. }
    ));

    // Vessel 2 departs first, the game tops fuel up and the flush sees it
    let second = h.engine.dispatch(&h.operator, None).await;
    assert_eq!(second.departed.len(), 1);
    assert_eq!(second.departed[0].vessel_id, 2);
    assert!(matches!(
        second.failed[0].reason,
        Rejection::InsufficientFuel { cached: false, .. }
    ));
}
