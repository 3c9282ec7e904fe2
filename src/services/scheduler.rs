//! Dispatch scheduler
//!
//! Timer ticks and on-demand requests both end up in `DispatchEngine::dispatch`.
//! Overlapping triggers for one operator are rejected by the operator lock,
//! never queued here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::dispatch::DispatchEngine;
use crate::domain::{DispatchSummary, VesselId};
use crate::error::{PilotError, Result};
use crate::operator::OperatorRegistry;

/// On-demand dispatch request, optionally restricted to some vessels
#[derive(Debug)]
pub struct DispatchRequest {
    pub operator_id: String,
    pub vessel_ids: Option<HashSet<VesselId>>,
    pub reply: Option<oneshot::Sender<DispatchSummary>>,
}

/// Cloneable sender side for on-demand triggers
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    request_tx: mpsc::Sender<DispatchRequest>,
}

impl SchedulerHandle {
    /// Trigger a pass and wait for its summary
    pub async fn trigger(
        &self,
        operator_id: &str,
        vessel_ids: Option<HashSet<VesselId>>,
    ) -> Result<DispatchSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(DispatchRequest {
                operator_id: operator_id.to_string(),
                vessel_ids,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| PilotError::Internal("dispatch scheduler stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| PilotError::Internal("dispatch finished without a summary".to_string()))
    }

    /// Trigger a pass without waiting for it
    pub fn trigger_detached(&self, operator_id: &str) -> Result<()> {
        self.request_tx
            .try_send(DispatchRequest {
                operator_id: operator_id.to_string(),
                vessel_ids: None,
                reply: None,
            })
            .map_err(|e| PilotError::Internal(format!("could not queue dispatch trigger: {}", e)))
    }
}

pub struct DispatchScheduler {
    engine: Arc<DispatchEngine>,
    registry: Arc<OperatorRegistry>,
    operators: Vec<String>,
    config: SchedulerConfig,
    request_rx: mpsc::Receiver<DispatchRequest>,
    in_flight: JoinSet<()>,
}

impl DispatchScheduler {
    pub fn new(
        engine: Arc<DispatchEngine>,
        registry: Arc<OperatorRegistry>,
        operators: Vec<String>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let scheduler = Self {
            engine,
            registry,
            operators,
            config,
            request_rx,
            in_flight: JoinSet::new(),
        };
        (scheduler, SchedulerHandle { request_tx })
    }

    /// Main loop, returns after shutdown once in-flight runs have finished
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            operators = self.operators.len(),
            enabled = self.config.enabled,
            interval_secs = self.config.interval_secs,
            "dispatch scheduler starting"
        );

        let mut tick = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        // Don't burst-fire missed ticks
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick(), if self.config.enabled => {
                    debug!("Scheduled dispatch tick");
                    for operator_id in self.operators.clone() {
                        self.spawn_dispatch(operator_id, None, None);
                    }
                }

                Some(request) = self.request_rx.recv() => {
                    info!("On-demand dispatch requested for {}", request.operator_id);
                    self.spawn_dispatch(request.operator_id, request.vessel_ids, request.reply);
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Dispatch task ended abnormally: {}", e);
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("dispatch scheduler: shutdown signal received");
                    break;
                }
            }
        }

        // Departures are never cancelled mid-flight
        if !self.in_flight.is_empty() {
            info!("Waiting for {} in-flight dispatch run(s)", self.in_flight.len());
        }
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Dispatch task ended abnormally: {}", e);
            }
        }

        info!("dispatch scheduler: main loop exited");
    }

    fn spawn_dispatch(
        &mut self,
        operator_id: String,
        vessel_ids: Option<HashSet<VesselId>>,
        reply: Option<oneshot::Sender<DispatchSummary>>,
    ) {
        let engine = self.engine.clone();
        let operator = self.registry.get_or_create(&operator_id);

        self.in_flight.spawn(async move {
            let summary = engine.dispatch(&operator, vessel_ids.as_ref()).await;
            if let Some(reply) = reply {
                if reply.send(summary).is_err() {
                    warn!("Dispatch requester for {} went away", operator_id);
                }
            }
        });
    }
}
