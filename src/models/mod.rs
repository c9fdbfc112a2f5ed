use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Side of the futures position currently held on the exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    None,
    Long,
    Short,
}

impl PositionSide {
    /// Order side that reduces a position on this side
    pub fn closing_order_side(self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Sell),
            PositionSide::Short => Some(OrderSide::Buy),
            PositionSide::None => None,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::None => "none",
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        };
        f.write_str(s)
    }
}

/// Classified exposure for one symbol
///
/// Rebuilt from the exchange on every query and never cached across cycles.
/// `amount == 0` if and only if `side == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub amount: f64,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: PositionSide::None,
            amount: 0.0,
        }
    }

    /// Classify a signed exchange quantity: positive is long, negative is short
    pub fn from_signed(symbol: &str, signed_amount: f64) -> Self {
        if !signed_amount.is_finite() || signed_amount == 0.0 {
            return Self::flat(symbol);
        }

        let side = if signed_amount > 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        };

        Self {
            symbol: symbol.to_string(),
            side,
            amount: signed_amount.abs(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::None
    }
}

/// Position exactly as the gateway reports it, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawPosition {
    pub amount: f64,  // signed
    pub side_id: String,
}

/// Directional trading signal value: -1, 0 or +1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Short,
    Flat,
    Long,
}

impl Direction {
    pub fn from_value(value: i8) -> Self {
        match value.signum() {
            1 => Direction::Long,
            -1 => Direction::Short,
            _ => Direction::Flat,
        }
    }

    pub fn value(self) -> i8 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        }
    }

    /// Position side this direction asks for
    pub fn target_side(self) -> PositionSide {
        match self {
            Direction::Long => PositionSide::Long,
            Direction::Short => PositionSide::Short,
            Direction::Flat => PositionSide::None,
        }
    }

    /// Order side that opens exposure in this direction
    pub fn opening_order_side(self) -> Option<OrderSide> {
        match self {
            Direction::Long => Some(OrderSide::Buy),
            Direction::Short => Some(OrderSide::Sell),
            Direction::Flat => None,
        }
    }
}

/// One signal per polling interval, read-only input to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub close_price: f64,
    pub direction: Direction,
}

/// Quantity constraints for a symbol, loaded once at startup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionSpec {
    pub min_quantity: f64,
    pub step_size: f64,
}

impl PrecisionSpec {
    pub fn is_valid(&self) -> bool {
        self.step_size.is_finite()
            && self.step_size > 0.0
            && self.min_quantity.is_finite()
            && self.min_quantity >= 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only mutation sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub reduce_only: bool,
}

/// Exchange acknowledgement of a placed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub client_order_id: String,
    pub status: String,
    pub executed_quantity: f64,
}

/// OHLCV bar from the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Named polling/bar interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum Interval {
    #[serde(rename = "1m")]
    #[value(name = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    #[value(name = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    #[value(name = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    #[value(name = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    #[value(name = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    #[value(name = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    #[value(name = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    #[value(name = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    #[value(name = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_secs(self) -> u64 {
        match self {
            Interval::OneMinute => 60,
            Interval::ThreeMinutes => 180,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::ThirtyMinutes => 1800,
            Interval::OneHour => 3600,
            Interval::TwoHours => 7200,
            Interval::FourHours => 14400,
            Interval::OneDay => 86400,
        }
    }

    /// Exchange interval code, e.g. "5m"
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::OneMinute),
            "3m" => Ok(Interval::ThreeMinutes),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "30m" => Ok(Interval::ThirtyMinutes),
            "1h" => Ok(Interval::OneHour),
            "2h" => Ok(Interval::TwoHours),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => Err(ConfigError::UnknownInterval(other.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize "ETH/USDT" style pairs to the exchange id "ETHUSDT"
pub fn exchange_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| *c != '/' && *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_classification() {
        let long = Position::from_signed("ETHUSDT", 0.5);
        assert_eq!(long.side, PositionSide::Long);
        assert_eq!(long.amount, 0.5);

        let short = Position::from_signed("ETHUSDT", -1.25);
        assert_eq!(short.side, PositionSide::Short);
        assert_eq!(short.amount, 1.25);

        let flat = Position::from_signed("ETHUSDT", 0.0);
        assert!(flat.is_flat());
        assert_eq!(flat.amount, 0.0);
    }

    #[test]
    fn test_non_finite_amount_is_flat() {
        assert!(Position::from_signed("ETHUSDT", f64::NAN).is_flat());
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(Direction::from_value(1), Direction::Long);
        assert_eq!(Direction::from_value(-1), Direction::Short);
        assert_eq!(Direction::from_value(0), Direction::Flat);
        assert_eq!(Direction::Long.opening_order_side(), Some(OrderSide::Buy));
        assert_eq!(Direction::Short.opening_order_side(), Some(OrderSide::Sell));
        assert_eq!(Direction::Flat.opening_order_side(), None);
        assert_eq!(PositionSide::Long.closing_order_side(), Some(OrderSide::Sell));
    }

    #[test]
    fn test_interval_table() {
        assert_eq!("1m".parse::<Interval>().unwrap().as_secs(), 60);
        assert_eq!("5m".parse::<Interval>().unwrap().as_secs(), 300);
        assert_eq!("1h".parse::<Interval>().unwrap().as_secs(), 3600);
        assert_eq!("1d".parse::<Interval>().unwrap().as_secs(), 86400);
        assert!("7m".parse::<Interval>().is_err());
    }

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("ETH/USDT"), "ETHUSDT");
        assert_eq!(exchange_symbol("btcusdt"), "BTCUSDT");
    }
}
