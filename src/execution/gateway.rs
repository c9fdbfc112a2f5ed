use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::models::{OrderIntent, OrderResult, PrecisionSpec, RawPosition};

/// Everything the controller needs from the exchange account
///
/// Implementations own their session/credentials; the controller only ever
/// talks to the exchange through this trait.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn load_precision(&self, symbol: &str) -> GatewayResult<PrecisionSpec>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;

    /// Signed position amount plus the exchange's side identifier
    async fn get_position(&self, symbol: &str) -> GatewayResult<RawPosition>;

    async fn get_free_balance(&self, asset: &str) -> GatewayResult<f64>;

    async fn place_market_order(&self, intent: &OrderIntent) -> GatewayResult<OrderResult>;
}
