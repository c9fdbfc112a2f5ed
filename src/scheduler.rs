use std::sync::Arc;
use std::time::Duration;

use crate::execution::{Clock, CycleReport, ExecutionController};
use crate::models::Interval;
use crate::strategy::SignalSource;
use crate::Result;

/// Drives the controller once per interval, forever
pub struct PollingScheduler {
    symbol: String,
    interval: Interval,
    source: Arc<dyn SignalSource>,
    controller: Arc<ExecutionController>,
    clock: Arc<dyn Clock>,
}

impl PollingScheduler {
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        source: Arc<dyn SignalSource>,
        controller: Arc<ExecutionController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            source,
            controller,
            clock,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval.as_secs())
    }

    /// Fetch the latest signal and hand it to the controller
    pub async fn tick(&self) -> Result<CycleReport> {
        let as_of = self.clock.now();
        let signal = self
            .source
            .get_signal(&self.symbol, self.interval, as_of)
            .await?;

        Ok(self.controller.run_cycle(&signal).await)
    }

    /// One tick with errors logged instead of returned
    pub async fn run_once(&self) -> Option<CycleReport> {
        tracing::info!(
            "💹 [TRADING] Tick at {}",
            self.clock.now().format("%Y-%m-%d %H:%M:%S")
        );

        match self.tick().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "❌ Tick failed");
                None
            }
        }
    }

    /// Run `ticks` cycles, sleeping one interval after each
    pub async fn run_ticks(&self, ticks: usize) -> Vec<Option<CycleReport>> {
        let mut reports = Vec::with_capacity(ticks);
        for _ in 0..ticks {
            reports.push(self.run_once().await);
            self.clock.sleep(self.period()).await;
        }
        reports
    }

    /// Loop until the process is stopped; a failed tick never ends the loop
    pub async fn run(&self) {
        tracing::info!(
            "🔄 Polling {} every {} ({} with {})",
            self.symbol,
            self.interval,
            self.interval.as_secs(),
            self.source.name()
        );

        loop {
            self.run_once().await;
            self.clock.sleep(self.period()).await;
        }
    }
}
