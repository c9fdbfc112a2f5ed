use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::config::Credentials;
use crate::error::{GatewayError, GatewayResult};
use crate::execution::controller::new_client_order_id;
use crate::execution::sizing::format_quantity;
use crate::execution::ExchangeGateway;
use crate::models::{Candle, Interval, OrderIntent, OrderResult, PrecisionSpec, RawPosition};
use crate::strategy::KlineProvider;

// USDⓈ-M futures REST API
// Docs: https://developers.binance.com/docs/derivatives/usds-margined-futures
const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const REQUESTS_PER_SECOND: u32 = 10;
const HTTP_TIMEOUT_SECS: u64 = 10;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Signed client for one Binance futures account
///
/// Cloneable; clones share the rate limiter and the market cache.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
    markets: Arc<RwLock<HashMap<String, PrecisionSpec>>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    min_qty: Option<String>,
    #[serde(default)]
    step_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    #[serde(default)]
    position_side: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetBalance {
    asset: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    client_order_id: String,
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeverageResponse {
    leverage: u32,
}

impl BinanceFuturesClient {
    pub fn new(credentials: Credentials, recv_window_ms: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let quota =
            Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        let base_url = if credentials.testnet {
            TESTNET_URL
        } else {
            MAINNET_URL
        };

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            credentials,
            recv_window_ms,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            markets: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Point the client at another host (mock servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_testnet(&self) -> bool {
        self.credentials.testnet
    }

    /// Load market metadata; must succeed before the client is usable
    pub async fn connect(&self) -> GatewayResult<usize> {
        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;

        let mut markets = HashMap::new();
        for symbol in info.symbols {
            if let Some(precision) = Self::lot_size(&symbol.filters) {
                markets.insert(symbol.symbol, precision);
            }
        }

        let count = markets.len();
        *self.markets.write().await = markets;

        tracing::info!(
            "✅ Loaded {} futures markets ({})",
            count,
            if self.is_testnet() { "testnet" } else { "mainnet" }
        );
        Ok(count)
    }

    fn lot_size(filters: &[SymbolFilter]) -> Option<PrecisionSpec> {
        let filter = filters.iter().find(|f| f.filter_type == "LOT_SIZE")?;
        let min_quantity = filter.min_qty.as_deref()?.parse().ok()?;
        let step_size = filter.step_size.as_deref()?.parse().ok()?;
        Some(PrecisionSpec {
            min_quantity,
            step_size,
        })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    fn sign(&self, query: &str) -> String {
        sign_query(&self.credentials.api_secret, query)
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        self.rate_limiter.until_ready().await;

        let query = Self::build_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };

        tracing::debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        self.rate_limiter.until_ready().await;

        let mut all_params = params.to_vec();
        all_params.push(("recvWindow", self.recv_window_ms.to_string()));
        all_params.push(("timestamp", Self::timestamp_ms().to_string()));

        let query = Self::build_query(&all_params);
        let signed = format!("{}&signature={}", query, self.sign(&query));
        let url = format!("{}{}", self.base_url, endpoint);

        tracing::debug!("{} (signed) {}", method, endpoint);

        let request = if method == Method::GET {
            self.client.get(format!("{}?{}", url, signed))
        } else {
            self.client
                .request(method, &url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed)
        };

        let response = request
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                tracing::error!("Failed to parse response: {} - Body: {}", e, body);
                GatewayError::Decode(e.to_string())
            });
        }

        if status.as_u16() == 429 || status.as_u16() == 418 || status.is_server_error() {
            return Err(GatewayError::Transient(format!("HTTP {}: {}", status, body)));
        }

        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(error) => Err(map_error_code(error.code, error.msg)),
            Err(_) => Err(GatewayError::Rejected {
                code: status.as_u16() as i64,
                message: body,
            }),
        }
    }

    async fn cached_precision(&self, symbol: &str) -> Option<PrecisionSpec> {
        self.markets.read().await.get(symbol).copied()
    }
}

/// HMAC-SHA256 signature of a query string, hex encoded
pub fn sign_query(secret: &str, query: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn map_error_code(code: i64, message: String) -> GatewayError {
    match code {
        -1001 | -1003 | -1007 | -1008 | -1021 => {
            GatewayError::Transient(format!("{}: {}", code, message))
        }
        -1002 | -1022 | -2014 | -2015 => GatewayError::Auth(message),
        -1121 => GatewayError::UnknownSymbol(message),
        _ => GatewayError::Rejected { code, message },
    }
}

fn parse_f64(value: &str, field: &str) -> GatewayResult<f64> {
    value
        .parse()
        .map_err(|_| GatewayError::Decode(format!("invalid {}: {}", field, value)))
}

fn millis_to_datetime(ms: i64) -> GatewayResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| GatewayError::Decode(format!("invalid timestamp {}", ms)))
}

fn parse_kline(row: &[serde_json::Value]) -> GatewayResult<Candle> {
    let number = |i: usize, field: &str| -> GatewayResult<f64> {
        match row.get(i) {
            Some(serde_json::Value::String(s)) => parse_f64(s, field),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| GatewayError::Decode(format!("invalid {}", field))),
            None => Err(GatewayError::Decode(format!("missing {}", field))),
        }
    };
    let time = |i: usize, field: &str| -> GatewayResult<DateTime<Utc>> {
        let ms = row
            .get(i)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GatewayError::Decode(format!("missing {}", field)))?;
        millis_to_datetime(ms)
    };

    Ok(Candle {
        open_time: time(0, "open time")?,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
        close_time: time(6, "close time")?,
    })
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    async fn load_precision(&self, symbol: &str) -> GatewayResult<PrecisionSpec> {
        if let Some(precision) = self.cached_precision(symbol).await {
            return Ok(precision);
        }

        // market cache may be empty if connect() was skipped or failed
        self.connect().await?;
        self.cached_precision(symbol)
            .await
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let response: LeverageResponse = self
            .signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
            )
            .await?;

        if response.leverage != leverage {
            return Err(GatewayError::Configuration(format!(
                "requested {}x leverage, exchange set {}x",
                leverage, response.leverage
            )));
        }
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> GatewayResult<RawPosition> {
        let positions: Vec<PositionRisk> = self
            .signed_request(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        match positions.into_iter().find(|p| p.symbol == symbol) {
            Some(position) => Ok(RawPosition {
                amount: parse_f64(&position.position_amt, "positionAmt")?,
                side_id: position.position_side.unwrap_or_else(|| "BOTH".to_string()),
            }),
            None => Ok(RawPosition {
                amount: 0.0,
                side_id: "BOTH".to_string(),
            }),
        }
    }

    async fn get_free_balance(&self, asset: &str) -> GatewayResult<f64> {
        let balances: Vec<AssetBalance> = self
            .signed_request(Method::GET, "/fapi/v2/balance", &[])
            .await?;

        match balances.into_iter().find(|b| b.asset == asset) {
            Some(balance) => parse_f64(&balance.available_balance, "availableBalance"),
            None => Ok(0.0),
        }
    }

    async fn place_market_order(&self, intent: &OrderIntent) -> GatewayResult<OrderResult> {
        let quantity = match self.cached_precision(&intent.symbol).await {
            Some(precision) => format_quantity(intent.quantity, precision.step_size),
            None => intent.quantity.to_string(),
        };
        let client_order_id = new_client_order_id();

        let mut params = vec![
            ("symbol", intent.symbol.clone()),
            ("side", intent.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.clone()),
            ("newClientOrderId", client_order_id),
        ];
        if intent.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        tracing::info!(
            "Placing order: {} {} {} (reduceOnly={})",
            intent.side,
            quantity,
            intent.symbol,
            intent.reduce_only
        );

        let response: OrderResponse = self
            .signed_request(Method::POST, "/fapi/v1/order", &params)
            .await?;

        Ok(OrderResult {
            order_id: response.order_id.to_string(),
            client_order_id: response.client_order_id,
            status: response.status,
            executed_quantity: response
                .executed_qty
                .as_deref()
                .and_then(|q| q.parse().ok())
                .unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl KlineProvider for BinanceFuturesClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> crate::Result<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(candles)
    }
}
