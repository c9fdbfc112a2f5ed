use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{KlineProvider, SignalSource};
use crate::models::{Candle, Direction, Interval, Signal};
use crate::Result;

/// Largest kline page the futures API serves
pub const MAX_KLINES: usize = 1500;

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    Some(
        prices[period..]
            .iter()
            .fold(seed, |ema, price| (price - ema) * multiplier + ema),
    )
}

/// Trend signal from a fast/slow EMA pair on closed bars
///
/// +1 while the fast EMA is above the slow one, -1 while below, 0 otherwise.
pub struct EmaTrendSignal {
    provider: Arc<dyn KlineProvider>,
    fast_period: usize,
    slow_period: usize,
}

impl EmaTrendSignal {
    pub fn new(provider: Arc<dyn KlineProvider>, fast_period: usize, slow_period: usize) -> Self {
        Self {
            provider,
            fast_period,
            slow_period,
        }
    }

    /// Bars to request: a warmed-up slow EMA plus the still-forming bar
    pub fn lookback(&self) -> usize {
        (self.slow_period * 3 + 1).min(MAX_KLINES)
    }

    /// Direction from closing prices, oldest first
    pub fn direction(&self, closes: &[f64]) -> Direction {
        match (
            calculate_ema(closes, self.fast_period),
            calculate_ema(closes, self.slow_period),
        ) {
            (Some(fast), Some(slow)) if fast > slow => Direction::Long,
            (Some(fast), Some(slow)) if fast < slow => Direction::Short,
            _ => Direction::Flat,
        }
    }
}

#[async_trait]
impl SignalSource for EmaTrendSignal {
    async fn get_signal(
        &self,
        symbol: &str,
        interval: Interval,
        as_of: DateTime<Utc>,
    ) -> Result<Signal> {
        let candles = self
            .provider
            .fetch_klines(symbol, interval, self.lookback())
            .await?;

        let closed: Vec<&Candle> = candles.iter().filter(|c| c.close_time < as_of).collect();
        let latest = closed
            .last()
            .ok_or_else(|| format!("No closed {} bars for {}", interval, symbol))?;

        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        if closes.len() < self.slow_period {
            tracing::warn!(
                "Insufficient data for {}: {} closed bars, need {}",
                symbol,
                closes.len(),
                self.slow_period
            );
        }

        Ok(Signal {
            symbol: symbol.to_string(),
            timestamp: latest.close_time,
            close_price: latest.close,
            direction: self.direction(&closes),
        })
    }

    fn name(&self) -> &str {
        "EMA Trend"
    }
}
