mod traits;

#[cfg(test)]
pub use traits::MockDispatchHooks;
pub use traits::{DispatchHooks, DispatchObserver, GameApi, NoopHooks, NoopObserver};
