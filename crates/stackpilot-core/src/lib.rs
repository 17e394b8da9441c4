// stackpilot-core - Stack lifecycle reconciliation
//
// A StackReconciler drives one named stack through one create, update or
// delete, always waiting for the provider to settle before returning. The
// waiting policy lives in PollScheduler so it can be tested on a paused clock.

pub mod error;
pub mod lock;
pub mod memory;
pub mod poll;
pub mod provider;
pub mod reconciler;
pub mod types;

pub use error::{ErrorKind, ProviderError, ReconcileError, Result};
pub use lock::{StackLockGuard, StackLocks};
pub use memory::InMemoryProvider;
pub use poll::{CancelSignal, PollPolicy, PollScheduler};
pub use provider::{ProviderClient, ProviderResult, TemplateSource};
pub use reconciler::StackReconciler;
pub use types::{
    OperationHandle, PollResult, RawStatus, StackAction, StackPhase, StackRequest, StackState,
};
