use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::retry::{retry_bounded, RetryBudget, RetryOutcome};
use super::sizing::{round_to_step, size_order};
use super::{
    Action, Clock, ExchangeGateway, ExecutionEvent, ExecutionObserver, PositionTracker,
};
use crate::error::GatewayError;
use crate::models::{
    Direction, OrderIntent, OrderSide, Position, PositionSide, PrecisionSpec, Signal,
};

/// What to believe when the position cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFailurePolicy {
    /// Skip the cycle; a failed re-query inside the close loop counts as a failed attempt
    SkipCycle,
    /// Treat the account as flat for this step
    AssumeFlat,
}

impl Default for QueryFailurePolicy {
    fn default() -> Self {
        QueryFailurePolicy::SkipCycle
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub symbol: String,
    pub quote_asset: String,
    pub notional_per_order: f64,
    pub leverage: u32,
    pub retry: RetryBudget,
    pub settle_delay: Duration,
    pub query_failure: QueryFailurePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed { quantity: f64, attempts: u32 },
    /// Position was already gone (or flipped) when re-checked
    AlreadyResolved { attempts: u32 },
    /// Remaining amount rounds below the exchange minimum
    NothingToClose { amount: f64 },
    Fallback(FallbackOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    Closed { quantity: f64 },
    NothingDetected,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened { side: OrderSide, quantity: f64 },
    Failed { error: String },
    Skipped { reason: String },
}

/// Everything that happened in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub position: Option<Position>,
    pub balance: Option<f64>,
    pub close: Option<CloseOutcome>,
    pub open: Option<OpenOutcome>,
    pub skipped: Option<String>,
}

impl CycleReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Result of a single close attempt that reached the exchange or found nothing to do
enum CloseStep {
    Closed { quantity: f64 },
    AlreadyResolved,
    NothingToClose { amount: f64 },
}

/// Keeps the exchange position for one symbol in line with the signal
///
/// The exchange is the only source of truth: the position is re-read before
/// every decision and never stored between cycles.
pub struct ExecutionController {
    config: ControllerConfig,
    gateway: Arc<dyn ExchangeGateway>,
    tracker: PositionTracker,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ExecutionObserver>,
    precision: Mutex<Option<PrecisionSpec>>,
}

impl ExecutionController {
    pub fn new(
        config: ControllerConfig,
        gateway: Arc<dyn ExchangeGateway>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Self {
        Self {
            tracker: PositionTracker::new(gateway.clone()),
            config,
            gateway,
            clock,
            observer,
            precision: Mutex::new(None),
        }
    }

    /// Set leverage and load precision; both failures are logged, neither is fatal
    pub async fn initialize(&self) {
        let symbol = &self.config.symbol;

        match self.gateway.set_leverage(symbol, self.config.leverage).await {
            Ok(()) => tracing::info!(
                "✅ Leverage set to {}x for {}",
                self.config.leverage,
                symbol
            ),
            Err(e) => tracing::error!("❌ Failed to set leverage for {}: {}", symbol, e),
        }

        if let Some(precision) = self.ensure_precision().await {
            tracing::info!(
                "✅ Min order quantity: {}, step size: {}",
                precision.min_quantity,
                precision.step_size
            );
        }
    }

    /// Cached precision, loading it from the exchange if not yet available
    pub async fn ensure_precision(&self) -> Option<PrecisionSpec> {
        if let Some(precision) = *self.lock_precision() {
            return Some(precision);
        }

        let symbol = &self.config.symbol;
        match self.gateway.load_precision(symbol).await {
            Ok(precision) if precision.is_valid() => {
                *self.lock_precision() = Some(precision);
                Some(precision)
            }
            Ok(precision) => {
                self.emit(
                    ExecutionEvent::new(symbol, Action::PrecisionUnavailable, "Invalid precision")
                        .with_error(format!("{:?}", precision)),
                );
                None
            }
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::PrecisionUnavailable,
                        "Failed to load precision",
                    )
                    .with_error(e),
                );
                None
            }
        }
    }

    fn lock_precision(&self) -> std::sync::MutexGuard<'_, Option<PrecisionSpec>> {
        // the guarded value is a plain Copy option, so a poisoned lock is still usable
        self.precision
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one decision step for `signal`
    pub async fn run_cycle(&self, signal: &Signal) -> CycleReport {
        let symbol = self.config.symbol.as_str();
        self.emit(ExecutionEvent::new(
            symbol,
            Action::CycleStarted,
            format!(
                "[{}] Close: {:.2}, Signal: {}",
                signal.timestamp.format("%Y-%m-%d %H:%M:%S"),
                signal.close_price,
                signal.direction.value()
            ),
        ));

        let position = match self.query_position().await {
            Ok(position) => position,
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::CycleSkipped,
                        "Position unknown, skipping cycle",
                    )
                    .with_error(e),
                );
                return CycleReport::skipped("position query failed");
            }
        };

        let balance = self.query_balance().await;
        tracing::info!(
            "Current position: {:.6} ({}), {} balance: {:.2}",
            position.amount,
            position.side,
            self.config.quote_asset,
            balance
        );

        let mut report = CycleReport {
            position: Some(position.clone()),
            balance: Some(balance),
            ..Default::default()
        };

        if signal.direction == Direction::Flat {
            self.emit(ExecutionEvent::new(symbol, Action::NoAction, "Flat signal, no action"));
            return report;
        }

        if position.side == signal.direction.target_side() {
            self.emit(ExecutionEvent::new(
                symbol,
                Action::NoAction,
                format!("Already {}, no action", position.side),
            ));
            return report;
        }

        let precision = match self.ensure_precision().await {
            Some(precision) => precision,
            None => {
                self.emit(ExecutionEvent::new(
                    symbol,
                    Action::CycleSkipped,
                    "No precision data, skipping orders this cycle",
                ));
                report.skipped = Some("precision unavailable".to_string());
                return report;
            }
        };

        let mut current = position;
        if !current.is_flat() {
            report.close = Some(self.close_position(current.side, &precision).await);

            self.clock.sleep(self.config.settle_delay).await;
            current = match self.query_position().await {
                Ok(position) => position,
                Err(e) => {
                    self.emit(
                        ExecutionEvent::new(
                            symbol,
                            Action::OpenSkipped,
                            "Position unknown after close, not opening",
                        )
                        .with_error(e),
                    );
                    report.open = Some(OpenOutcome::Skipped {
                        reason: "position query failed".to_string(),
                    });
                    return report;
                }
            };
        }

        if current.is_flat() {
            report.open = Some(
                self.open_position(signal.direction, signal.close_price, &precision)
                    .await,
            );
        } else {
            let reason = format!("{} {} still open", current.amount, current.side);
            self.emit(
                ExecutionEvent::new(symbol, Action::OpenSkipped, format!("Not opening: {}", reason))
                    .with_quantity(current.amount),
            );
            report.open = Some(OpenOutcome::Skipped { reason });
        }

        report
    }

    /// Bounded-retry close of a position on `side`, with a one-shot fallback
    ///
    /// Only transient errors are retried; a permanent rejection goes straight
    /// to the fallback.
    pub async fn close_position(
        &self,
        side: PositionSide,
        precision: &PrecisionSpec,
    ) -> CloseOutcome {
        let symbol = self.config.symbol.as_str();
        let retry = self.config.retry;

        let outcome = retry_bounded(
            &retry,
            self.clock.as_ref(),
            GatewayError::is_transient,
            |attempt| self.close_attempt(side, precision, attempt),
        )
        .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => match value {
                CloseStep::Closed { quantity } => CloseOutcome::Closed { quantity, attempts },
                CloseStep::AlreadyResolved => CloseOutcome::AlreadyResolved { attempts },
                CloseStep::NothingToClose { amount } => CloseOutcome::NothingToClose { amount },
            },
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let reason = if last_error.is_transient() {
                    "hit max retries"
                } else {
                    "failed permanently"
                };
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::CloseExhausted,
                        format!("Close {} {}, trying full close", side, reason),
                    )
                    .with_attempt(attempts)
                    .with_error(last_error),
                );
                CloseOutcome::Fallback(self.fallback_close(precision).await)
            }
        }
    }

    async fn close_attempt(
        &self,
        expected: PositionSide,
        precision: &PrecisionSpec,
        attempt: u32,
    ) -> Result<CloseStep, GatewayError> {
        let symbol = self.config.symbol.as_str();
        let max_attempts = self.config.retry.max_attempts;

        let position = self.query_position().await.map_err(|e| {
            self.emit(
                ExecutionEvent::new(symbol, Action::CloseAttemptFailed, "Position re-check failed")
                    .with_attempt(attempt)
                    .with_error(&e),
            );
            e
        })?;

        if position.side != expected || position.amount == 0.0 {
            self.emit(
                ExecutionEvent::new(
                    symbol,
                    Action::CloseAlreadyResolved,
                    format!("No {} position left to close", expected),
                )
                .with_attempt(attempt),
            );
            return Ok(CloseStep::AlreadyResolved);
        }

        let quantity = round_to_step(position.amount, precision.step_size);
        if quantity < precision.min_quantity {
            self.emit(
                ExecutionEvent::new(
                    symbol,
                    Action::NothingToClose,
                    format!(
                        "{} below minimum {}, nothing to close",
                        quantity, precision.min_quantity
                    ),
                )
                .with_attempt(attempt)
                .with_quantity(position.amount),
            );
            return Ok(CloseStep::NothingToClose {
                amount: position.amount,
            });
        }

        let Some(side) = expected.closing_order_side() else {
            return Ok(CloseStep::AlreadyResolved);
        };
        let intent = OrderIntent {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only: true,
        };

        match self.gateway.place_market_order(&intent).await {
            Ok(order) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::CloseSucceeded,
                        format!("Closed {} {} (order {})", expected, quantity, order.order_id),
                    )
                    .with_attempt(attempt)
                    .with_quantity(quantity),
                );
                self.clock.sleep(self.config.settle_delay).await;
                Ok(CloseStep::Closed { quantity })
            }
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::CloseAttemptFailed,
                        format!("Close {} failed (attempt {}/{})", expected, attempt, max_attempts),
                    )
                    .with_attempt(attempt)
                    .with_quantity(quantity)
                    .with_error(&e),
                );
                Err(e)
            }
        }
    }

    /// Single, non-retried reduce-only order for whatever is open right now
    pub async fn fallback_close(&self, precision: &PrecisionSpec) -> FallbackOutcome {
        let symbol = self.config.symbol.as_str();

        let position = match self.query_position().await {
            Ok(position) => position,
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::FallbackFailed,
                        "Position unknown, full close aborted",
                    )
                    .with_error(&e),
                );
                return FallbackOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let quantity = round_to_step(position.amount, precision.step_size);
        let side = match position.side.closing_order_side() {
            Some(side) if quantity > 0.0 => side,
            _ => {
                self.emit(ExecutionEvent::new(
                    symbol,
                    Action::FallbackSkipped,
                    "No position detected, nothing to fully close",
                ));
                return FallbackOutcome::NothingDetected;
            }
        };

        let intent = OrderIntent {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only: true,
        };

        match self.gateway.place_market_order(&intent).await {
            Ok(_) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::FallbackSucceeded,
                        format!("Fully closed {} {}", position.side, quantity),
                    )
                    .with_quantity(quantity),
                );
                self.clock.sleep(self.config.settle_delay).await;
                FallbackOutcome::Closed { quantity }
            }
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::FallbackFailed,
                        format!(
                            "Full close of {} {} failed, position may remain open",
                            position.side, quantity
                        ),
                    )
                    .with_quantity(quantity)
                    .with_error(&e),
                );
                FallbackOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// One non-reduce-only market order in the signal's direction; never retried
    pub async fn open_position(
        &self,
        direction: Direction,
        price: f64,
        precision: &PrecisionSpec,
    ) -> OpenOutcome {
        let symbol = self.config.symbol.as_str();

        let Some(side) = direction.opening_order_side() else {
            return OpenOutcome::Skipped {
                reason: "flat signal".to_string(),
            };
        };

        let Some(quantity) =
            size_order(self.config.notional_per_order, self.config.leverage, price, precision)
        else {
            let reason = format!("cannot size order at price {}", price);
            self.emit(ExecutionEvent::new(
                symbol,
                Action::OpenSkipped,
                format!("Not opening: {}", reason),
            ));
            return OpenOutcome::Skipped { reason };
        };

        let intent = OrderIntent {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only: false,
        };

        match self.gateway.place_market_order(&intent).await {
            Ok(order) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::OpenSucceeded,
                        format!(
                            "Opened {} {} (order {})",
                            direction.target_side(),
                            quantity,
                            order.order_id
                        ),
                    )
                    .with_quantity(quantity),
                );
                self.clock.sleep(self.config.settle_delay).await;
                OpenOutcome::Opened { side, quantity }
            }
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::OpenFailed,
                        format!("Open {} {} failed", direction.target_side(), quantity),
                    )
                    .with_quantity(quantity)
                    .with_error(&e),
                );
                OpenOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Position query with the configured failure policy applied
    async fn query_position(&self) -> Result<Position, GatewayError> {
        let symbol = self.config.symbol.as_str();
        match self.tracker.query(symbol).await {
            Ok(position) => Ok(position),
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        symbol,
                        Action::PositionQueryFailed,
                        "Position query failed",
                    )
                    .with_error(&e),
                );
                match self.config.query_failure {
                    QueryFailurePolicy::AssumeFlat => Ok(Position::flat(symbol)),
                    QueryFailurePolicy::SkipCycle => Err(e),
                }
            }
        }
    }

    async fn query_balance(&self) -> f64 {
        match self.gateway.get_free_balance(&self.config.quote_asset).await {
            Ok(balance) => balance,
            Err(e) => {
                self.emit(
                    ExecutionEvent::new(
                        &self.config.symbol,
                        Action::BalanceQueryFailed,
                        format!("{} balance query failed", self.config.quote_asset),
                    )
                    .with_error(e),
                );
                0.0
            }
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        self.observer.record(event);
    }
}

/// Unique client order id for one submission
pub fn new_client_order_id() -> String {
    format!("at-{}", Uuid::new_v4().simple())
}
