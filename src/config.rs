use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ConfigError;
use crate::execution::{ControllerConfig, QueryFailurePolicy, RetryBudget};
use crate::models::{exchange_symbol, Interval};
use crate::strategy::ema_trend::MAX_KLINES;

const DEFAULT_CONFIG_FILE: &str = "autotrader";
const ENV_PREFIX: &str = "AUTOTRADER";

/// Startup settings, fixed for the lifetime of the process
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub symbol: String,
    pub interval: Interval,
    pub notional_per_order: f64,
    pub leverage: u32,
    pub max_close_attempts: u32,
    pub backoff_secs: u64,
    pub settle_delay_ms: u64,
    pub quote_asset: String,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub recv_window_ms: u64,
    pub position_query_failure: QueryFailurePolicy,
}

/// Values supplied on the command line; they win over file and environment
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub symbol: Option<String>,
    pub interval: Option<Interval>,
    pub notional_per_order: Option<f64>,
    pub leverage: Option<u32>,
    pub max_close_attempts: Option<u32>,
}

impl Settings {
    /// Layer defaults, an optional TOML file, `AUTOTRADER_*` env vars and CLI overrides
    pub fn load(
        config_path: Option<&str>,
        overrides: &SettingsOverrides,
    ) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("symbol", "ETH/USDT")?
            .set_default("interval", "1m")?
            .set_default("notional_per_order", 50.0)?
            .set_default("leverage", 5)?
            .set_default("max_close_attempts", 3)?
            .set_default("backoff_secs", 2)?
            .set_default("settle_delay_ms", 1000)?
            .set_default("quote_asset", "USDT")?
            .set_default("ema_fast", 9)?
            .set_default("ema_slow", 21)?
            .set_default("recv_window_ms", 5000)?
            .set_default("position_query_failure", "skip_cycle")?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .set_override_option("symbol", overrides.symbol.clone())?
            .set_override_option("interval", overrides.interval.map(|i| i.as_str()))?
            .set_override_option("notional_per_order", overrides.notional_per_order)?
            .set_override_option("leverage", overrides.leverage.map(i64::from))?
            .set_override_option(
                "max_close_attempts",
                overrides.max_close_attempts.map(i64::from),
            )?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if exchange_symbol(&self.symbol).is_empty() {
            return Err(invalid("symbol", "must not be empty"));
        }
        if !(self.notional_per_order.is_finite() && self.notional_per_order > 0.0) {
            return Err(invalid("notional_per_order", "must be a positive number"));
        }
        if !(1..=125).contains(&self.leverage) {
            return Err(invalid("leverage", "must be between 1 and 125"));
        }
        if self.max_close_attempts == 0 {
            return Err(invalid("max_close_attempts", "must be at least 1"));
        }
        if self.ema_fast == 0 || self.ema_fast >= self.ema_slow {
            return Err(invalid("ema_fast", "must be non-zero and below ema_slow"));
        }
        if self.ema_slow >= MAX_KLINES {
            return Err(invalid(
                "ema_slow",
                &format!("must be below {} (one kline page)", MAX_KLINES),
            ));
        }
        Ok(())
    }

    /// Exchange id of the traded symbol, e.g. "ETHUSDT"
    pub fn exchange_symbol(&self) -> String {
        exchange_symbol(&self.symbol)
    }

    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_close_attempts, Duration::from_secs(self.backoff_secs))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            symbol: self.exchange_symbol(),
            quote_asset: self.quote_asset.clone(),
            notional_per_order: self.notional_per_order,
            leverage: self.leverage,
            retry: self.retry_budget(),
            settle_delay: self.settle_delay(),
            query_failure: self.position_query_failure,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// API credentials for the futures account
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("BINANCE_API_KEY_FUTURE")
            .map_err(|_| ConfigError::MissingEnv("BINANCE_API_KEY_FUTURE"))?;
        let api_secret = std::env::var("BINANCE_SECRET_FUTURE")
            .map_err(|_| ConfigError::MissingEnv("BINANCE_SECRET_FUTURE"))?;
        let testnet = std::env::var("BINANCE_TESTNET_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(Self {
            api_key,
            api_secret,
            testnet,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("testnet", &self.testnet)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            symbol: "ETH/USDT".to_string(),
            interval: Interval::OneMinute,
            notional_per_order: 500.0,
            leverage: 5,
            max_close_attempts: 3,
            backoff_secs: 2,
            settle_delay_ms: 1000,
            quote_asset: "USDT".to_string(),
            ema_fast: 9,
            ema_slow: 21,
            recv_window_ms: 5000,
            position_query_failure: QueryFailurePolicy::SkipCycle,
        }
    }

    #[test]
    fn test_defaults_with_overrides() {
        let overrides = SettingsOverrides {
            symbol: Some("BTC/USDT".to_string()),
            interval: Some(Interval::FiveMinutes),
            leverage: Some(10),
            ..Default::default()
        };

        let settings = Settings::load(None, &overrides).unwrap();
        assert_eq!(settings.exchange_symbol(), "BTCUSDT");
        assert_eq!(settings.interval, Interval::FiveMinutes);
        assert_eq!(settings.leverage, 10);
        assert_eq!(settings.max_close_attempts, 3);
        assert_eq!(settings.retry_budget().backoff, Duration::from_secs(2));
        assert_eq!(settings.position_query_failure, QueryFailurePolicy::SkipCycle);

        let controller = settings.controller_config();
        assert_eq!(controller.symbol, "BTCUSDT");
        assert_eq!(controller.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = base_settings();
        settings.max_close_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = base_settings();
        settings.notional_per_order = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = base_settings();
        settings.leverage = 200;
        assert!(settings.validate().is_err());

        let mut settings = base_settings();
        settings.ema_fast = 30;
        assert!(settings.validate().is_err());

        let mut settings = base_settings();
        settings.ema_slow = 1500;
        assert!(settings.validate().is_err());
        settings.ema_slow = 1499;
        assert!(settings.validate().is_ok());

        assert!(base_settings().validate().is_ok());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = Settings::load(Some("/nonexistent/autotrader.toml"), &Default::default());
        assert!(result.is_err());
    }
}
