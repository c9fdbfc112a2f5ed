use std::sync::Arc;

use super::ExchangeGateway;
use crate::error::GatewayError;
use crate::models::Position;

/// Reads and classifies the live position for a symbol
///
/// Nothing is cached: every call is a fresh round-trip to the exchange.
#[derive(Clone)]
pub struct PositionTracker {
    gateway: Arc<dyn ExchangeGateway>,
}

impl PositionTracker {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Query the current position
    ///
    /// Errors are returned instead of being folded into a flat position, so the
    /// caller decides whether "unknown" may be treated as "none".
    pub async fn query(&self, symbol: &str) -> Result<Position, GatewayError> {
        let raw = self.gateway.get_position(symbol).await?;
        let position = Position::from_signed(symbol, raw.amount);

        tracing::debug!(
            symbol = %symbol,
            side = %position.side,
            amount = position.amount,
            side_id = %raw.side_id,
            "Position queried"
        );

        Ok(position)
    }
}
