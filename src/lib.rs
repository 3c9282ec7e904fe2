pub mod adapters;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod operator;
pub mod services;

pub use config::AppConfig;
pub use dispatch::{BatchProgress, DispatchEngine, FuelFailureMemo};
pub use domain::{DispatchOutcome, DispatchReason, DispatchSummary, OutcomeClass};
pub use error::{PilotError, Result};
pub use gateway::{DispatchHooks, DispatchObserver, GameApi, NoopHooks, NoopObserver};
pub use operator::{OperatorHandle, OperatorRegistry};
pub use services::{DispatchScheduler, SchedulerHandle};
