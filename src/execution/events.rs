use std::fmt;

/// What the controller just did (or decided not to do)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CycleStarted,
    CycleSkipped,
    PositionQueryFailed,
    BalanceQueryFailed,
    PrecisionUnavailable,
    NoAction,
    CloseAttemptFailed,
    CloseSucceeded,
    CloseAlreadyResolved,
    NothingToClose,
    CloseExhausted,
    FallbackSucceeded,
    FallbackSkipped,
    FallbackFailed,
    OpenSucceeded,
    OpenFailed,
    OpenSkipped,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::CycleStarted => "cycle_started",
            Action::CycleSkipped => "cycle_skipped",
            Action::PositionQueryFailed => "position_query_failed",
            Action::BalanceQueryFailed => "balance_query_failed",
            Action::PrecisionUnavailable => "precision_unavailable",
            Action::NoAction => "no_action",
            Action::CloseAttemptFailed => "close_attempt_failed",
            Action::CloseSucceeded => "close_succeeded",
            Action::CloseAlreadyResolved => "close_already_resolved",
            Action::NothingToClose => "nothing_to_close",
            Action::CloseExhausted => "close_exhausted",
            Action::FallbackSucceeded => "fallback_succeeded",
            Action::FallbackSkipped => "fallback_skipped",
            Action::FallbackFailed => "fallback_failed",
            Action::OpenSucceeded => "open_succeeded",
            Action::OpenFailed => "open_failed",
            Action::OpenSkipped => "open_skipped",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Action::CycleStarted
            | Action::NoAction
            | Action::CloseSucceeded
            | Action::CloseAlreadyResolved
            | Action::NothingToClose
            | Action::FallbackSucceeded
            | Action::OpenSucceeded => Severity::Info,
            Action::CycleSkipped
            | Action::BalanceQueryFailed
            | Action::CloseAttemptFailed
            | Action::FallbackSkipped
            | Action::OpenSkipped => Severity::Warn,
            Action::PositionQueryFailed
            | Action::PrecisionUnavailable
            | Action::CloseExhausted
            | Action::FallbackFailed
            | Action::OpenFailed => Severity::Error,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Structured record of one controller step
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEvent {
    pub symbol: String,
    pub action: Action,
    pub attempt: Option<u32>,
    pub quantity: Option<f64>,
    pub error: Option<String>,
    pub message: String,
}

impl ExecutionEvent {
    pub fn new(symbol: &str, action: Action, message: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            attempt: None,
            quantity: None,
            error: None,
            message: message.into(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Sink for controller events
pub trait ExecutionObserver: Send + Sync {
    fn record(&self, event: ExecutionEvent);
}

/// Emits every event as a leveled tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn record(&self, event: ExecutionEvent) {
        let attempt = event.attempt.map(|a| a.to_string()).unwrap_or_default();
        let quantity = event.quantity.map(|q| q.to_string()).unwrap_or_default();
        let error = event.error.as_deref().unwrap_or("");

        match event.action.severity() {
            Severity::Info => tracing::info!(
                symbol = %event.symbol,
                action = %event.action,
                attempt = %attempt,
                quantity = %quantity,
                "✓ {}",
                event.message
            ),
            Severity::Warn => tracing::warn!(
                symbol = %event.symbol,
                action = %event.action,
                attempt = %attempt,
                quantity = %quantity,
                error = %error,
                "⚠️ {}",
                event.message
            ),
            Severity::Error => tracing::error!(
                symbol = %event.symbol,
                action = %event.action,
                attempt = %attempt,
                quantity = %quantity,
                error = %error,
                "✗ {}",
                event.message
            ),
        }
    }
}
