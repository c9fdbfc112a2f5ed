//! In-memory fakes shared by the execution and scheduler unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration;

use super::{Action, Clock, ExchangeGateway, ExecutionEvent, ExecutionObserver};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{OrderIntent, OrderResult, OrderSide, PrecisionSpec, RawPosition};

#[derive(Default)]
struct GatewayState {
    position: f64,
    balance: f64,
    precision: Option<PrecisionSpec>,
    orders: Vec<OrderIntent>,
    attempted_orders: Vec<OrderIntent>,
    leverage_calls: Vec<u32>,
    order_failures: u32,
    position_failures: u32,
    balance_failures: u32,
    precision_failures: u32,
    position_queries: u32,
    fill_failed_orders: bool,
    reject_code: Option<i64>,
}

/// Exchange fake that fills market orders against a single signed position
pub struct MockGateway {
    state: Mutex<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState {
                balance: 1000.0,
                precision: Some(PrecisionSpec {
                    min_quantity: 0.01,
                    step_size: 0.001,
                }),
                ..Default::default()
            }),
        }
    }

    pub fn set_position(&self, signed_amount: f64) {
        self.state.lock().unwrap().position = signed_amount;
    }

    pub fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    pub fn set_precision(&self, precision: Option<PrecisionSpec>) {
        self.state.lock().unwrap().precision = precision;
    }

    /// Fail the next `n` order placements
    pub fn fail_orders(&self, n: u32) {
        self.state.lock().unwrap().order_failures = n;
    }

    /// Failed orders still move the position (lost acknowledgement)
    pub fn fill_failed_orders(&self, fill: bool) {
        self.state.lock().unwrap().fill_failed_orders = fill;
    }

    /// Failed orders come back as a permanent rejection with `code`
    pub fn reject_failed_orders(&self, code: i64) {
        self.state.lock().unwrap().reject_code = Some(code);
    }

    pub fn fail_position_queries(&self, n: u32) {
        self.state.lock().unwrap().position_failures = n;
    }

    pub fn fail_balance_queries(&self, n: u32) {
        self.state.lock().unwrap().balance_failures = n;
    }

    pub fn fail_precision_loads(&self, n: u32) {
        self.state.lock().unwrap().precision_failures = n;
    }

    /// Orders the exchange accepted
    pub fn orders(&self) -> Vec<OrderIntent> {
        self.state.lock().unwrap().orders.clone()
    }

    /// Every order submitted, accepted or not
    pub fn attempted_orders(&self) -> Vec<OrderIntent> {
        self.state.lock().unwrap().attempted_orders.clone()
    }

    pub fn leverage_calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().leverage_calls.clone()
    }

    pub fn position_queries(&self) -> u32 {
        self.state.lock().unwrap().position_queries
    }

    fn apply_fill(state: &mut GatewayState, intent: &OrderIntent) {
        let signed = match intent.side {
            OrderSide::Buy => intent.quantity,
            OrderSide::Sell => -intent.quantity,
        };

        if intent.reduce_only {
            let reduced = state.position + signed;
            // reduce-only never flips the position
            state.position = if state.position.signum() != reduced.signum() {
                0.0
            } else {
                reduced
            };
        } else {
            state.position += signed;
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn load_precision(&self, symbol: &str) -> GatewayResult<PrecisionSpec> {
        let mut state = self.state.lock().unwrap();
        if state.precision_failures > 0 {
            state.precision_failures -= 1;
            return Err(GatewayError::Transient("exchangeInfo unavailable".to_string()));
        }
        state
            .precision
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.state.lock().unwrap().leverage_calls.push(leverage);
        Ok(())
    }

    async fn get_position(&self, _symbol: &str) -> GatewayResult<RawPosition> {
        let mut state = self.state.lock().unwrap();
        state.position_queries += 1;
        if state.position_failures > 0 {
            state.position_failures -= 1;
            return Err(GatewayError::Transient("positionRisk timed out".to_string()));
        }
        Ok(RawPosition {
            amount: state.position,
            side_id: "BOTH".to_string(),
        })
    }

    async fn get_free_balance(&self, _asset: &str) -> GatewayResult<f64> {
        let mut state = self.state.lock().unwrap();
        if state.balance_failures > 0 {
            state.balance_failures -= 1;
            return Err(GatewayError::Transient("balance timed out".to_string()));
        }
        Ok(state.balance)
    }

    async fn place_market_order(&self, intent: &OrderIntent) -> GatewayResult<OrderResult> {
        let mut state = self.state.lock().unwrap();
        state.attempted_orders.push(intent.clone());

        if state.order_failures > 0 {
            state.order_failures -= 1;
            if state.fill_failed_orders {
                Self::apply_fill(&mut state, intent);
            }
            return Err(match state.reject_code {
                Some(code) => GatewayError::Rejected {
                    code,
                    message: "ReduceOnly Order is rejected".to_string(),
                },
                None => GatewayError::Transient("Too many requests".to_string()),
            });
        }

        Self::apply_fill(&mut state, intent);
        state.orders.push(intent.clone());

        Ok(OrderResult {
            order_id: state.orders.len().to_string(),
            client_order_id: format!("mock-{}", state.orders.len()),
            status: "FILLED".to_string(),
            executed_quantity: intent.quantity,
        })
    }
}

/// Clock whose sleeps return at once and are recorded
pub struct RecordingClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn count_sleeps(&self, duration: Duration) -> usize {
        self.sleeps().iter().filter(|d| **d == duration).count()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.events().iter().map(|e| e.action).collect()
    }

    pub fn count(&self, action: Action) -> usize {
        self.actions().iter().filter(|a| **a == action).count()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn record(&self, event: ExecutionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
