// Order execution: sizing, position tracking, bounded retries and the controller
pub mod clock;
pub mod controller;
pub mod events;
pub mod gateway;
pub mod position_tracker;
pub mod retry;
pub mod sizing;

#[cfg(test)]
pub(crate) mod mock;

pub use clock::{Clock, TokioClock};
pub use controller::{
    CloseOutcome, ControllerConfig, CycleReport, ExecutionController, FallbackOutcome,
    OpenOutcome, QueryFailurePolicy,
};
pub use events::{Action, ExecutionEvent, ExecutionObserver, Severity, TracingObserver};
pub use gateway::ExchangeGateway;
pub use position_tracker::PositionTracker;
pub use retry::{retry_bounded, RetryBudget, RetryOutcome};
