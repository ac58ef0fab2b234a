//! CLOB venue REST client with HMAC-SHA256 request signing.
//!
//! The venue uses two-level auth: L1 wallet signatures derive API
//! credentials externally; every trading request here is L2-signed with
//! HMAC-SHA256 over `timestamp + method + path + body`.
//!
//! Order identity (side, token, price bounds, size) is validated before any
//! network call; a request that would be rejected by a transition guard
//! never reaches the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const HEADER_API_KEY: &str = "VENUE_API_KEY";
const HEADER_SIGNATURE: &str = "VENUE_SIGNATURE";
const HEADER_TIMESTAMP: &str = "VENUE_TIMESTAMP";
const HEADER_PASSPHRASE: &str = "VENUE_PASSPHRASE";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("missing API credentials")]
    MissingCredentials,
    #[error("HMAC key error: {0}")]
    HmacKey(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid order: {0}")]
    InvalidOrder(&'static str),
    #[error("unparseable response: {0}")]
    Parse(String),
}

impl VenueError {
    /// Transient failures are retried on the natural next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl VenueCredentials {
    pub fn from_config(api_key: &str, secret: &str, passphrase: &str) -> Option<Self> {
        if api_key.is_empty() || secret.is_empty() || passphrase.is_empty() {
            return None;
        }
        Some(Self {
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            passphrase: passphrase.to_string(),
        })
    }
}

/// Build L2 auth headers: HMAC-SHA256(secret, timestamp + method + path + body)
/// base64-encoded.
pub fn sign_request(
    creds: &VenueCredentials,
    method: &str,
    path: &str,
    body: &str,
) -> Result<HeaderMap, VenueError> {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);

    let secret_bytes = BASE64
        .decode(&creds.secret)
        .map_err(|e| VenueError::HmacKey(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| VenueError::HmacKey(e.to_string()))?;
    mac.update(message.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(
        HEADER_API_KEY,
        HeaderValue::from_str(&creds.api_key).map_err(|e| VenueError::HmacKey(e.to_string()))?,
    );
    headers.insert(
        HEADER_SIGNATURE,
        HeaderValue::from_str(&signature).map_err(|e| VenueError::HmacKey(e.to_string()))?,
    );
    headers.insert(
        HEADER_TIMESTAMP,
        HeaderValue::from_str(&timestamp).map_err(|e| VenueError::HmacKey(e.to_string()))?,
    );
    headers.insert(
        HEADER_PASSPHRASE,
        HeaderValue::from_str(&creds.passphrase)
            .map_err(|e| VenueError::HmacKey(e.to_string()))?,
    );
    Ok(headers)
}

// ─── Order model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Good-til-cancelled limit order.
    Gtc,
    /// Fill-or-kill.
    Fok,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderRequest {
    /// Reject malformed orders before they reach the network.
    pub fn validate(&self) -> Result<(), VenueError> {
        if self.token_id.is_empty() {
            return Err(VenueError::InvalidOrder("empty token id"));
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(VenueError::InvalidOrder("price must be inside (0, 1)"));
        }
        if self.size <= Decimal::ZERO {
            return Err(VenueError::InvalidOrder("size must be positive"));
        }
        Ok(())
    }
}

/// Venue acknowledgement for a placed order. An ack that omits the order id
/// must not be treated as a successful submission: a later fill check could
/// not reconcile it.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: Option<String>,
    pub status: String,
    pub success: bool,
    pub error_msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
    Unknown(String),
}

impl OrderStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "live" | "open" | "delayed" => OrderStatus::Open,
            "matched" | "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" => OrderStatus::Cancelled,
            "expired" => OrderStatus::Expired,
            other => OrderStatus::Unknown(other.to_string()),
        }
    }

    /// Statuses from which the order can never fill.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Expired)
    }
}

#[derive(Debug, Clone)]
pub struct OrderInfo {
    pub order_id: String,
    pub status: OrderStatus,
    pub original_size: Decimal,
    pub size_matched: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Matched,
    Mined,
    Confirmed,
    Retrying,
    Failed,
}

impl TradeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MATCHED" => Some(TradeStatus::Matched),
            "MINED" => Some(TradeStatus::Mined),
            "CONFIRMED" => Some(TradeStatus::Confirmed),
            "RETRYING" => Some(TradeStatus::Retrying),
            "FAILED" => Some(TradeStatus::Failed),
            _ => None,
        }
    }
}

/// An independently-reported match record referencing an order.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: String,
    pub order_id: String,
    /// Outcome token traded.
    pub asset_id: String,
    pub side: Option<Side>,
    pub outcome: String,
    pub price: Decimal,
    pub size: Decimal,
    pub status: TradeStatus,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub market: Option<String>,
    pub maker_address: Option<String>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CancelMode {
    All,
    Orders(Vec<String>),
    Market(String),
}

// ─── Response parsing (pure, tested without HTTP) ────────────────────────────

fn parse_decimal(value: &serde_json::Value, field: &str) -> Result<Decimal, VenueError> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if raw.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(raw).map_err(|e| VenueError::Parse(format!("{field}: {e}")))
}

pub fn parse_order_ack(value: &serde_json::Value) -> OrderAck {
    let order_id = value
        .get("orderID")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    OrderAck {
        order_id,
        status: value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        success: value
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        error_msg: value
            .get("errorMsg")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

pub fn parse_order_info(value: &serde_json::Value) -> Result<OrderInfo, VenueError> {
    let order_id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VenueError::Parse("order response missing id".into()))?
        .to_string();
    Ok(OrderInfo {
        order_id,
        status: OrderStatus::parse(
            value
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
        ),
        original_size: parse_decimal(value, "original_size")?,
        size_matched: parse_decimal(value, "size_matched")?,
    })
}

pub fn parse_trades(value: &serde_json::Value) -> Vec<TradeRecord> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let status = TradeStatus::parse(
                item.get("status").and_then(|v| v.as_str()).unwrap_or(""),
            )?;
            Some(TradeRecord {
                id: item.get("id").and_then(|v| v.as_str())?.to_string(),
                order_id: item
                    .get("taker_order_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                asset_id: item
                    .get("asset_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                side: item
                    .get("side")
                    .and_then(|v| v.as_str())
                    .and_then(Side::parse),
                outcome: item
                    .get("outcome")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                price: parse_decimal(item, "price").ok()?,
                size: parse_decimal(item, "size").ok()?,
                status,
            })
        })
        .collect()
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Authenticated CLOB REST client.
pub struct VenueClient {
    client: reqwest::Client,
    base_url: String,
    creds: VenueCredentials,
}

impl VenueClient {
    pub fn new(base_url: String, creds: VenueCredentials) -> Result<Self, VenueError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            creds,
        })
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, VenueError> {
        let headers = sign_request(&self.creds, "GET", path, "")?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).headers(headers).send().await?;
        Self::into_json(resp).await
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, VenueError> {
        let body_str = serde_json::to_string(body).unwrap_or_default();
        let headers = sign_request(&self.creds, "POST", path, &body_str)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;
        Self::into_json(resp).await
    }

    async fn delete(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, VenueError> {
        let body_str = serde_json::to_string(body).unwrap_or_default();
        let headers = sign_request(&self.creds, "DELETE", path, &body_str)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .delete(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;
        Self::into_json(resp).await
    }

    async fn into_json(resp: reqwest::Response) -> Result<serde_json::Value, VenueError> {
        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError::Api { status, body });
        }
        Ok(resp.json().await?)
    }

    /// Place a single order. The request is validated locally first.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, VenueError> {
        request.validate()?;
        let body = serde_json::json!({
            "tokenID": request.token_id,
            "price": request.price.to_string(),
            "size": request.size.to_string(),
            "side": request.side.as_str(),
            "orderType": request.order_type.as_str(),
        });
        debug!(token = %request.token_id, side = request.side.as_str(), "placing order");
        let resp = self.post("/order", &body).await?;
        Ok(parse_order_ack(&resp))
    }

    /// Fetch an order's own status and fill ratio.
    pub async fn get_order(&self, order_id: &str) -> Result<OrderInfo, VenueError> {
        let resp = self.get(&format!("/data/order/{order_id}")).await?;
        parse_order_info(&resp)
    }

    /// Fetch trade records, independently of order status.
    pub async fn get_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>, VenueError> {
        let mut query = Vec::new();
        if let Some(market) = &filter.market {
            query.push(format!("market={market}"));
        }
        if let Some(maker) = &filter.maker_address {
            query.push(format!("maker_address={maker}"));
        }
        if let Some(order_id) = &filter.order_id {
            query.push(format!("taker_order_id={order_id}"));
        }
        let path = if query.is_empty() {
            "/data/trades".to_string()
        } else {
            format!("/data/trades?{}", query.join("&"))
        };
        let resp = self.get(&path).await?;
        Ok(parse_trades(&resp))
    }

    pub async fn cancel_orders(&self, mode: CancelMode) -> Result<(), VenueError> {
        match mode {
            CancelMode::All => {
                self.delete("/cancel-all", &serde_json::json!({})).await?;
            }
            CancelMode::Orders(ids) => {
                self.delete("/orders", &serde_json::json!({ "orderIDs": ids }))
                    .await?;
            }
            CancelMode::Market(market) => {
                self.delete("/cancel-market-orders", &serde_json::json!({ "market": market }))
                    .await?;
            }
        }
        Ok(())
    }

    /// Dead man's switch: if heartbeats stop, the venue cancels open orders.
    pub async fn heartbeat(&self) -> Result<(), VenueError> {
        self.get("/heartbeat").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn order_validation_rejects_before_network() {
        let base = OrderRequest {
            token_id: "tok".into(),
            side: Side::Buy,
            order_type: OrderType::Gtc,
            price: dec("0.55"),
            size: dec("100"),
        };
        assert!(base.validate().is_ok());

        let mut bad = base.clone();
        bad.price = dec("1.0");
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.size = Decimal::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = base;
        bad.token_id = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn ack_without_order_id_is_not_submitted() {
        let resp = serde_json::json!({
            "success": true,
            "status": "live",
            "orderID": "",
            "errorMsg": "",
        });
        let ack = parse_order_ack(&resp);
        assert!(ack.success);
        assert_eq!(ack.order_id, None);
    }

    #[test]
    fn order_status_parsing_covers_terminal_failures() {
        assert_eq!(OrderStatus::parse("LIVE"), OrderStatus::Open);
        assert_eq!(OrderStatus::parse("matched"), OrderStatus::Filled);
        assert!(OrderStatus::parse("canceled").is_terminal_failure());
        assert!(OrderStatus::parse("expired").is_terminal_failure());
        assert!(!OrderStatus::parse("live").is_terminal_failure());
    }

    #[test]
    fn trade_records_parse_and_skip_unknown_statuses() {
        let resp = serde_json::json!([
            {
                "id": "t1",
                "taker_order_id": "o1",
                "asset_id": "tok-1",
                "side": "BUY",
                "outcome": "Yes",
                "price": "0.55",
                "size": "100",
                "status": "CONFIRMED",
            },
            { "id": "t2", "taker_order_id": "o1", "status": "???" },
        ]);
        let trades = parse_trades(&resp);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].order_id, "o1");
        assert_eq!(trades[0].status, TradeStatus::Confirmed);
        assert_eq!(trades[0].size, dec("100"));
    }
}
