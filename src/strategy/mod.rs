// Signal sources feeding the execution controller
pub mod ema_trend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Candle, Interval, Signal};
use crate::Result;

pub use ema_trend::EmaTrendSignal;

/// Produces one directional signal per polling interval
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Signal for the most recently closed bar at `as_of`
    async fn get_signal(
        &self,
        symbol: &str,
        interval: Interval,
        as_of: DateTime<Utc>,
    ) -> Result<Signal>;

    /// Get strategy name
    fn name(&self) -> &str;
}

/// Recent OHLCV bars for a symbol, oldest first
#[async_trait]
pub trait KlineProvider: Send + Sync {
    async fn fetch_klines(&self, symbol: &str, interval: Interval, limit: usize)
        -> Result<Vec<Candle>>;
}
