pub mod events;
pub mod scheduler;

pub use events::{BroadcastObserver, DispatchEvent, FanoutObserver, TracingObserver};
pub use scheduler::{DispatchRequest, DispatchScheduler, SchedulerHandle};
