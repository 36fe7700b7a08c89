//! Hyperliquid connector: l2Book WebSocket feed plus the /info and
//! /exchange REST surface, normalized at this boundary.

use crate::bus::EventBus;
use crate::core::config::{CoreConfig, VenueConfig};
use crate::core::error::VenueError;
use crate::core::events::{
    Balance, CancelAck, ConnectionStatus, HealthEvent, OrderAck, OrderSide, OrderStatus,
    OrderStatusReport, OrderType, Position, PriceEvent, QuoteUpdate, UnifiedOrder, VenueId,
};
use crate::types::{Price, Size, Symbol};
use crate::venues::connector::{RequestSigner, VenueConnector};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const VENUE: VenueId = VenueId::Hyperliquid;

pub struct HyperliquidConnector {
    config: VenueConfig,
    /// On-chain account the venue keys positions and orders by
    account: String,
    signer: Arc<dyn RequestSigner>,
    bus: EventBus,
    http: Client,
    request_timeout: Duration,
    submit_timeout: Duration,
    connected: Arc<AtomicBool>,
    /// Bumped on every connect/disconnect so a superseded reader task
    /// cannot clobber the state of its successor
    generation: Arc<AtomicU64>,
    subscriptions: Arc<RwLock<HashSet<Symbol>>>,
    sink: Arc<Mutex<Option<WsSink>>>,
}

impl HyperliquidConnector {
    pub fn new(
        config: VenueConfig,
        account: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
        bus: EventBus,
        core: &CoreConfig,
    ) -> Self {
        Self {
            config,
            account: account.into(),
            signer,
            bus,
            http: Client::new(),
            request_timeout: core.request_timeout,
            submit_timeout: core.submit_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    fn net_error(e: reqwest::Error, mutating: bool) -> VenueError {
        if e.is_timeout() && mutating {
            VenueError::Ambiguous {
                venue: VENUE,
                reason: e.to_string(),
            }
        } else {
            VenueError::Protocol {
                venue: VENUE,
                reason: e.to_string(),
            }
        }
    }

    async fn info_request(&self, body: Value) -> Result<Value, VenueError> {
        let url = format!("{}/info", self.config.rest_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::net_error(e, false))?;
        if !response.status().is_success() {
            return Err(VenueError::Protocol {
                venue: VENUE,
                reason: format!("info request failed: {}", response.status()),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Self::net_error(e, false))
    }

    async fn exchange_request(&self, body: Value) -> Result<Value, VenueError> {
        let url = format!("{}/exchange", self.config.rest_url);
        let payload = body.to_string();
        let headers = self.signer.sign("POST", "/exchange", &payload)?;
        let mut request = self
            .http
            .post(&url)
            .timeout(self.submit_timeout)
            .json(&body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| Self::net_error(e, true))?;
        if !response.status().is_success() {
            return Err(VenueError::Protocol {
                venue: VENUE,
                reason: format!("exchange request failed: {}", response.status()),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Self::net_error(e, true))
    }

    async fn send_subscriptions(&self, symbols: &[Symbol]) -> Result<(), VenueError> {
        let mut sink = self.sink.lock().await;
        let sink = match sink.as_mut() {
            Some(sink) => sink,
            None => return Ok(()),
        };
        for symbol in symbols {
            let frame = json!({
                "method": "subscribe",
                "subscription": { "type": "l2Book", "coin": symbol.base_asset() }
            });
            sink.send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| VenueError::Protocol {
                    venue: VENUE,
                    reason: format!("subscribe send failed: {}", e),
                })?;
        }
        Ok(())
    }

    fn spawn_reader(&self, mut stream: WsStream, generation: u64) {
        let bus = self.bus.clone();
        let connected = self.connected.clone();
        let generation_counter = self.generation.clone();
        let subscriptions = self.subscriptions.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                if generation_counter.load(Ordering::SeqCst) != generation {
                    return;
                }
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(top) = parse_l2_book(&text) {
                            let symbol = {
                                let subscriptions = subscriptions.read().await;
                                subscriptions
                                    .iter()
                                    .find(|s| s.base_asset() == top.coin)
                                    .cloned()
                            };
                            if let Some(symbol) = symbol {
                                bus.publish_price(PriceEvent::Quote(QuoteUpdate {
                                    venue: VENUE,
                                    symbol,
                                    bid: top.bid,
                                    bid_size: top.bid_size,
                                    ask: top.ask,
                                    ask_size: top.ask_size,
                                    timestamp: Utc
                                        .timestamp_millis_opt(top.time_ms)
                                        .single()
                                        .unwrap_or_else(Utc::now),
                                }));
                            }
                        } else {
                            debug!("unhandled hyperliquid frame");
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "hyperliquid stream error");
                        break;
                    }
                }
            }
            if generation_counter.load(Ordering::SeqCst) == generation
                && connected.swap(false, Ordering::SeqCst)
            {
                bus.publish_health(HealthEvent::connection(
                    VENUE,
                    ConnectionStatus::Disconnected,
                    Some("live feed closed".to_string()),
                ));
            }
        });
    }
}

#[async_trait]
impl VenueConnector for HyperliquidConnector {
    fn venue(&self) -> VenueId {
        VENUE
    }

    async fn connect(&self) -> Result<(), VenueError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let handshake = tokio::time::timeout(
            self.request_timeout,
            connect_async(self.config.ws_url.as_str()),
        )
        .await
        .map_err(|_| VenueError::Unreachable {
            venue: VENUE,
            reason: "websocket handshake timed out".to_string(),
        })?
        .map_err(|e| VenueError::Unreachable {
            venue: VENUE,
            reason: e.to_string(),
        })?;

        let (sink, stream) = handshake.0.split();
        *self.sink.lock().await = Some(sink);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::SeqCst);
        self.bus.publish_health(HealthEvent::connection(
            VENUE,
            ConnectionStatus::Connected,
            None,
        ));
        info!("hyperliquid connected");

        // Replay the retained subscription set
        let symbols: Vec<Symbol> = self.subscriptions.read().await.iter().cloned().collect();
        if !symbols.is_empty() {
            self.send_subscriptions(&symbols).await?;
        }
        self.spawn_reader(stream, generation);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VenueError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            self.bus.publish_health(HealthEvent::connection(
                VENUE,
                ConnectionStatus::Disconnected,
                Some("disconnect requested".to_string()),
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_order(&self, order: &UnifiedOrder) -> Result<OrderAck, VenueError> {
        let body = json!({
            "action": {
                "type": "order",
                "orders": [{
                    "coin": order.symbol.base_asset(),
                    "is_buy": order.side == OrderSide::Buy,
                    "sz": order.quantity.to_string(),
                    "limit_px": order.price.map(|p| p.to_string()),
                    "trigger_px": order.stop_price.map(|p| p.to_string()),
                    "order_type": match order.order_type {
                        OrderType::Market => "market",
                        OrderType::Limit => "limit",
                        OrderType::StopMarket => "stop_market",
                        OrderType::StopLimit => "stop_limit",
                    },
                    "cloid": order.client_order_id,
                }]
            },
            "account": self.account,
        });
        let response = self.exchange_request(body).await?;
        parse_order_ack(&response)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck, VenueError> {
        let oid: u64 = venue_order_id.parse().map_err(|_| VenueError::Protocol {
            venue: VENUE,
            reason: format!("malformed venue order id: {}", venue_order_id),
        })?;
        let body = json!({
            "action": { "type": "cancel", "cancels": [{ "oid": oid }] },
            "account": self.account,
        });
        let response = self.exchange_request(body).await?;
        if response.get("status").and_then(Value::as_str) == Some("ok") {
            Ok(CancelAck {
                venue_order_id: venue_order_id.to_string(),
                status: OrderStatus::Cancelled,
                timestamp: Utc::now(),
            })
        } else {
            Err(VenueError::Rejected {
                venue: VENUE,
                reason: response
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or("cancel refused")
                    .to_string(),
            })
        }
    }

    async fn fetch_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderStatusReport>, VenueError> {
        let response = self
            .info_request(json!({
                "type": "orderStatus",
                "user": self.account,
                "oid": client_order_id,
            }))
            .await?;
        parse_order_status(&response)
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError> {
        let response = self
            .info_request(json!({
                "type": "clearinghouseState",
                "user": self.account,
            }))
            .await?;
        parse_positions(&response)
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError> {
        let response = self
            .info_request(json!({
                "type": "clearinghouseState",
                "user": self.account,
            }))
            .await?;
        parse_balances(&response)
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), VenueError> {
        {
            let mut subscriptions = self.subscriptions.write().await;
            for symbol in symbols {
                subscriptions.insert(symbol.clone());
            }
        }
        if self.is_connected() {
            self.send_subscriptions(symbols).await?;
        }
        Ok(())
    }
}

/// Top of book parsed from an l2Book frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BookTop {
    pub coin: String,
    pub bid: Price,
    pub bid_size: Size,
    pub ask: Price,
    pub ask_size: Size,
    pub time_ms: i64,
}

fn level(value: &Value) -> Option<(Price, Size)> {
    let px = value.get("px").and_then(Value::as_str)?;
    let sz = value.get("sz").and_then(Value::as_str)?;
    Some((Price::from_str(px).ok()?, Size::from_str(sz).ok()?))
}

/// Parse an l2Book frame; None for any other frame shape
pub(crate) fn parse_l2_book(text: &str) -> Option<BookTop> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("channel").and_then(Value::as_str) != Some("l2Book") {
        return None;
    }
    let data = value.get("data")?;
    let coin = data.get("coin").and_then(Value::as_str)?.to_string();
    let levels = data.get("levels")?.as_array()?;
    let (bid, bid_size) = level(levels.first()?.as_array()?.first()?)?;
    let (ask, ask_size) = level(levels.get(1)?.as_array()?.first()?)?;
    let time_ms = data.get("time").and_then(Value::as_i64).unwrap_or(0);
    Some(BookTop {
        coin,
        bid,
        bid_size,
        ask,
        ask_size,
        time_ms,
    })
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "open" => OrderStatus::Open,
        "filled" => OrderStatus::Filled,
        "canceled" | "marginCanceled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Open,
    }
}

/// Parse the /exchange order response into an acknowledgement
pub(crate) fn parse_order_ack(response: &Value) -> Result<OrderAck, VenueError> {
    if response.get("status").and_then(Value::as_str) != Some("ok") {
        return Err(VenueError::Rejected {
            venue: VENUE,
            reason: response
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or("order refused")
                .to_string(),
        });
    }
    let statuses = response
        .pointer("/response/data/statuses")
        .and_then(Value::as_array)
        .ok_or_else(|| VenueError::Protocol {
            venue: VENUE,
            reason: "order response missing statuses".to_string(),
        })?;
    let first = statuses.first().ok_or_else(|| VenueError::Protocol {
        venue: VENUE,
        reason: "order response empty".to_string(),
    })?;
    if let Some(resting) = first.get("resting") {
        let oid = resting
            .get("oid")
            .and_then(Value::as_u64)
            .ok_or_else(|| VenueError::Protocol {
                venue: VENUE,
                reason: "resting order missing oid".to_string(),
            })?;
        Ok(OrderAck {
            venue_order_id: oid.to_string(),
            status: OrderStatus::Open,
            timestamp: Utc::now(),
        })
    } else if let Some(filled) = first.get("filled") {
        let oid = filled
            .get("oid")
            .and_then(Value::as_u64)
            .ok_or_else(|| VenueError::Protocol {
                venue: VENUE,
                reason: "filled order missing oid".to_string(),
            })?;
        Ok(OrderAck {
            venue_order_id: oid.to_string(),
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
        })
    } else if let Some(error) = first.get("error").and_then(Value::as_str) {
        Err(VenueError::Rejected {
            venue: VENUE,
            reason: error.to_string(),
        })
    } else {
        Err(VenueError::Protocol {
            venue: VENUE,
            reason: "unrecognized order status shape".to_string(),
        })
    }
}

/// Parse an orderStatus answer. `unknownOid` is the definitive
/// "this venue never saw the order".
pub(crate) fn parse_order_status(response: &Value) -> Result<Option<OrderStatusReport>, VenueError> {
    match response.get("status").and_then(Value::as_str) {
        Some("unknownOid") => Ok(None),
        Some("ok") => {
            let entry = response.get("order").ok_or_else(|| VenueError::Protocol {
                venue: VENUE,
                reason: "orderStatus missing order".to_string(),
            })?;
            let order = entry.get("order").unwrap_or(entry);
            let oid = order
                .get("oid")
                .and_then(Value::as_u64)
                .ok_or_else(|| VenueError::Protocol {
                    venue: VENUE,
                    reason: "orderStatus missing oid".to_string(),
                })?;
            let coin = order.get("coin").and_then(Value::as_str).unwrap_or_default();
            let status = entry
                .get("status")
                .and_then(Value::as_str)
                .map(map_status)
                .unwrap_or(OrderStatus::Open);
            let filled = entry
                .get("filledSz")
                .and_then(Value::as_str)
                .and_then(|s| Size::from_str(s).ok())
                .unwrap_or_else(Size::zero);
            let average = entry
                .get("avgPx")
                .and_then(Value::as_str)
                .and_then(|s| Price::from_str(s).ok());
            Ok(Some(OrderStatusReport {
                venue: VENUE,
                client_order_id: order
                    .get("cloid")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                venue_order_id: oid.to_string(),
                symbol: Symbol::new(format!("{}-USD", coin)),
                status,
                filled_quantity: filled,
                average_fill_price: average,
                timestamp: Utc::now(),
            }))
        }
        _ => Err(VenueError::Protocol {
            venue: VENUE,
            reason: "unrecognized orderStatus answer".to_string(),
        }),
    }
}

/// Parse clearinghouseState into normalized positions
pub(crate) fn parse_positions(response: &Value) -> Result<Vec<Position>, VenueError> {
    let entries = response
        .get("assetPositions")
        .and_then(Value::as_array)
        .ok_or_else(|| VenueError::Protocol {
            venue: VENUE,
            reason: "clearinghouseState missing assetPositions".to_string(),
        })?;
    let timestamp = response
        .get("time")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let mut positions = Vec::with_capacity(entries.len());
    for entry in entries {
        let position = match entry.get("position") {
            Some(p) => p,
            None => continue,
        };
        let coin = match position.get("coin").and_then(Value::as_str) {
            Some(c) => c,
            None => continue,
        };
        let size = position
            .get("szi")
            .and_then(Value::as_str)
            .and_then(|s| Size::from_str(s).ok())
            .unwrap_or_else(Size::zero);
        if size.is_zero() {
            continue;
        }
        let entry_price = position
            .get("entryPx")
            .and_then(Value::as_str)
            .and_then(|s| Price::from_str(s).ok())
            .unwrap_or(Price(Decimal::ZERO));
        // The venue reports notional, not mark; recover mark from it
        let mark_price = position
            .get("positionValue")
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .map(|notional| Price(notional / size.abs().value()))
            .unwrap_or(entry_price);
        let unrealized = position
            .get("unrealizedPnl")
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        positions.push(Position {
            venue: VENUE,
            symbol: Symbol::new(format!("{}-USD", coin)),
            size,
            entry_price,
            mark_price,
            unrealized_pnl: unrealized,
            realized_pnl: Decimal::ZERO,
            updated_at: timestamp,
        });
    }
    Ok(positions)
}

/// Parse the margin summary into a single USDC balance
pub(crate) fn parse_balances(response: &Value) -> Result<Vec<Balance>, VenueError> {
    let summary = response
        .get("marginSummary")
        .ok_or_else(|| VenueError::Protocol {
            venue: VENUE,
            reason: "clearinghouseState missing marginSummary".to_string(),
        })?;
    let decimal = |key: &str| -> Decimal {
        summary
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO)
    };
    let total = decimal("accountValue");
    let locked = decimal("totalMarginUsed");
    Ok(vec![Balance {
        venue: VENUE,
        asset: "USDC".to_string(),
        total,
        available: total - locked,
        locked,
        updated_at: Utc::now(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::connector::HmacSha256Signer;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_l2_book_top_of_book() {
        let frame = r#"{
            "channel": "l2Book",
            "data": {
                "coin": "BTC",
                "time": 1722945600000,
                "levels": [
                    [{"px": "45000", "sz": "1.5"}, {"px": "44999", "sz": "3"}],
                    [{"px": "45010", "sz": "2"}, {"px": "45011", "sz": "1"}]
                ]
            }
        }"#;
        let top = parse_l2_book(frame).unwrap();
        assert_eq!(top.coin, "BTC");
        assert_eq!(top.bid, Price::from_str("45000").unwrap());
        assert_eq!(top.ask, Price::from_str("45010").unwrap());
        assert_eq!(top.bid_size, Size::from_str("1.5").unwrap());
        assert_eq!(top.time_ms, 1722945600000);
    }

    #[test]
    fn test_parse_l2_book_ignores_other_frames() {
        assert!(parse_l2_book(r#"{"channel":"subscriptionResponse"}"#).is_none());
        assert!(parse_l2_book("not json").is_none());
    }

    #[test]
    fn test_parse_order_ack_resting_and_filled() {
        let resting = json!({
            "status": "ok",
            "response": { "type": "order", "data": { "statuses": [{ "resting": { "oid": 77 } }] } }
        });
        let ack = parse_order_ack(&resting).unwrap();
        assert_eq!(ack.venue_order_id, "77");
        assert_eq!(ack.status, OrderStatus::Open);

        let filled = json!({
            "status": "ok",
            "response": { "type": "order", "data": { "statuses": [{ "filled": { "oid": 78 } }] } }
        });
        let ack = parse_order_ack(&filled).unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    #[test]
    fn test_parse_order_ack_rejection() {
        let refused = json!({ "status": "err", "response": "Insufficient margin" });
        match parse_order_ack(&refused) {
            Err(VenueError::Rejected { reason, .. }) => assert_eq!(reason, "Insufficient margin"),
            other => panic!("expected rejection, got {:?}", other),
        }

        let inline_error = json!({
            "status": "ok",
            "response": { "type": "order", "data": { "statuses": [{ "error": "Price too far" }] } }
        });
        assert!(matches!(
            parse_order_ack(&inline_error),
            Err(VenueError::Rejected { .. })
        ));
    }

    #[test]
    fn test_parse_order_status_unknown_oid_is_definitive_none() {
        let answer = json!({ "status": "unknownOid" });
        assert!(parse_order_status(&answer).unwrap().is_none());
    }

    #[test]
    fn test_parse_order_status_filled() {
        let answer = json!({
            "status": "ok",
            "order": {
                "order": { "oid": 77, "coin": "BTC", "cloid": "c-1" },
                "status": "filled",
                "filledSz": "0.5",
                "avgPx": "45000"
            }
        });
        let report = parse_order_status(&answer).unwrap().unwrap();
        assert_eq!(report.venue_order_id, "77");
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.client_order_id, Some("c-1".to_string()));
        assert_eq!(report.filled_quantity, Size::from_str("0.5").unwrap());
    }

    #[test]
    fn test_parse_positions_recovers_mark_from_notional() {
        let state = json!({
            "time": 1722945600000i64,
            "assetPositions": [
                { "position": { "coin": "BTC", "szi": "0.5", "entryPx": "44000",
                                "positionValue": "22500", "unrealizedPnl": "500" } },
                { "position": { "coin": "ETH", "szi": "0" } }
            ],
            "marginSummary": { "accountValue": "10000", "totalMarginUsed": "2250" }
        });
        let positions = parse_positions(&state).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, Symbol::new("BTC-USD"));
        assert_eq!(positions[0].mark_price, Price::from_str("45000").unwrap());
        assert_eq!(positions[0].unrealized_pnl, Decimal::from_str("500").unwrap());
    }

    #[test]
    fn test_parse_balances_from_margin_summary() {
        let state = json!({
            "assetPositions": [],
            "marginSummary": { "accountValue": "10000", "totalMarginUsed": "2250" }
        });
        let balances = parse_balances(&state).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].asset, "USDC");
        assert_eq!(balances[0].available, Decimal::from_str("7750").unwrap());
    }

    #[tokio::test]
    async fn test_fetch_positions_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({ "type": "clearinghouseState" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assetPositions": [
                    { "position": { "coin": "BTC", "szi": "1", "entryPx": "44000",
                                    "positionValue": "45000", "unrealizedPnl": "1000" } }
                ],
                "marginSummary": { "accountValue": "50000", "totalMarginUsed": "9000" }
            })))
            .mount(&server)
            .await;

        let bus = EventBus::new(16);
        let config = VenueConfig {
            venue: VENUE,
            rest_url: server.uri(),
            ws_url: "wss://unused.invalid/ws".to_string(),
        };
        let signer = Arc::new(HmacSha256Signer::new(VENUE, "key", "secret"));
        let connector =
            HyperliquidConnector::new(config, "0xabc", signer, bus, &CoreConfig::default());

        let positions = connector.fetch_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, Size::from_str("1").unwrap());
        assert_eq!(positions[0].mark_price, Price::from_str("45000").unwrap());

        let balances = connector.fetch_balances().await.unwrap();
        assert_eq!(balances[0].total, Decimal::from_str("50000").unwrap());
    }
}
