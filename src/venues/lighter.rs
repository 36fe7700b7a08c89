//! Lighter connector: stream-multiplexed ticker WebSocket plus a
//! conventional signed REST surface, normalized at this boundary.

use crate::bus::EventBus;
use crate::core::config::{CoreConfig, VenueConfig};
use crate::core::error::VenueError;
use crate::core::events::{
    Balance, CancelAck, ConnectionStatus, HealthEvent, OrderAck, OrderSide, OrderStatus,
    OrderStatusReport, OrderType, Position, PriceEvent, QuoteUpdate, TimeInForce, UnifiedOrder,
    VenueId,
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

const VENUE: VenueId = VenueId::Lighter;

pub struct LighterConnector {
    config: VenueConfig,
    signer: Arc<dyn RequestSigner>,
    bus: EventBus,
    http: Client,
    request_timeout: Duration,
    submit_timeout: Duration,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    subscriptions: Arc<RwLock<HashSet<Symbol>>>,
    sink: Arc<Mutex<Option<WsSink>>>,
    subscribe_seq: AtomicU64,
}

impl LighterConnector {
    pub fn new(
        config: VenueConfig,
        signer: Arc<dyn RequestSigner>,
        bus: EventBus,
        core: &CoreConfig,
    ) -> Self {
        Self {
            config,
            signer,
            bus,
            http: Client::new(),
            request_timeout: core.request_timeout,
            submit_timeout: core.submit_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            sink: Arc::new(Mutex::new(None)),
            subscribe_seq: AtomicU64::new(1),
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

    async fn signed_get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, VenueError> {
        let headers = self.signer.sign("GET", path, "")?;
        let url = format!("{}{}", self.config.rest_url, path);
        let mut request = self.http.get(&url).timeout(self.request_timeout).query(query);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| Self::net_error(e, false))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VenueError::OrderNotFound {
                venue: VENUE,
                order_id: query
                    .first()
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default(),
            });
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(VenueError::Auth {
                venue: VENUE,
                reason: "request signature refused".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(VenueError::Protocol {
                venue: VENUE,
                reason: format!("GET {} failed: {}", path, response.status()),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Self::net_error(e, false))
    }

    async fn send_subscriptions(&self, symbols: &[Symbol]) -> Result<(), VenueError> {
        let mut sink = self.sink.lock().await;
        let sink = match sink.as_mut() {
            Some(sink) => sink,
            None => return Ok(()),
        };
        let params: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.as_str().to_lowercase()))
            .collect();
        let frame = json!({
            "id": self.subscribe_seq.fetch_add(1, Ordering::SeqCst),
            "method": "subscribe",
            "params": params,
        });
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| VenueError::Protocol {
                venue: VENUE,
                reason: format!("subscribe send failed: {}", e),
            })
    }

    fn spawn_reader(&self, mut stream: WsStream, generation: u64) {
        let bus = self.bus.clone();
        let connected = self.connected.clone();
        let generation_counter = self.generation.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                if generation_counter.load(Ordering::SeqCst) != generation {
                    return;
                }
                match message {
                    Ok(Message::Text(text)) => match parse_ticker(&text) {
                        Some(quote) => bus.publish_price(PriceEvent::Quote(quote)),
                        None => debug!("unhandled lighter frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "lighter stream error");
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
impl VenueConnector for LighterConnector {
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
        info!("lighter connected");

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
            "symbol": order.symbol.as_str(),
            "side": match order.side {
                OrderSide::Buy => "BUY",
                OrderSide::Sell => "SELL",
            },
            "type": match order.order_type {
                OrderType::Market => "MARKET",
                OrderType::Limit => "LIMIT",
                OrderType::StopMarket => "STOP_MARKET",
                OrderType::StopLimit => "STOP_LIMIT",
            },
            "quantity": order.quantity.to_string(),
            "price": order.price.map(|p| p.to_string()),
            "stopPrice": order.stop_price.map(|p| p.to_string()),
            "timeInForce": match order.time_in_force {
                TimeInForce::GoodTillCancelled => "GTC",
                TimeInForce::ImmediateOrCancel => "IOC",
                TimeInForce::FillOrKill => "FOK",
            },
            "clientOrderId": order.client_order_id,
        });
        let payload = body.to_string();
        let headers = self.signer.sign("POST", "/v1/orders", &payload)?;
        let url = format!("{}/v1/orders", self.config.rest_url);
        let mut request = self
            .http
            .post(&url)
            .timeout(self.submit_timeout)
            .json(&body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| Self::net_error(e, true))?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let answer: Value = response
                .json()
                .await
                .map_err(|e| Self::net_error(e, true))?;
            return Err(VenueError::Rejected {
                venue: VENUE,
                reason: answer
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("order refused")
                    .to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(VenueError::Protocol {
                venue: VENUE,
                reason: format!("order submit failed: {}", response.status()),
            });
        }
        let answer: Value = response
            .json()
            .await
            .map_err(|e| Self::net_error(e, true))?;
        parse_order_ack(&answer)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck, VenueError> {
        let path = format!("/v1/orders/{}", venue_order_id);
        let headers = self.signer.sign("DELETE", &path, "")?;
        let url = format!("{}{}", self.config.rest_url, path);
        let mut request = self.http.delete(&url).timeout(self.submit_timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| Self::net_error(e, true))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VenueError::OrderNotFound {
                venue: VENUE,
                order_id: venue_order_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(VenueError::Protocol {
                venue: VENUE,
                reason: format!("cancel failed: {}", response.status()),
            });
        }
        Ok(CancelAck {
            venue_order_id: venue_order_id.to_string(),
            status: OrderStatus::Cancelled,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderStatusReport>, VenueError> {
        match self
            .signed_get("/v1/orders", &[("clientOrderId", client_order_id)])
            .await
        {
            Ok(answer) => parse_order_report(&answer).map(Some),
            Err(VenueError::OrderNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError> {
        let answer = self.signed_get("/v1/positions", &[]).await?;
        parse_positions(&answer)
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError> {
        let answer = self.signed_get("/v1/balances", &[]).await?;
        parse_balances(&answer)
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

fn map_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Open,
    }
}

/// Parse a `<pair>@ticker` stream frame into a normalized quote
pub(crate) fn parse_ticker(text: &str) -> Option<QuoteUpdate> {
    let value: Value = serde_json::from_str(text).ok()?;
    let stream = value.get("stream").and_then(Value::as_str)?;
    let pair = stream.strip_suffix("@ticker")?;
    let data = value.get("data")?;
    let field = |key: &str| data.get(key).and_then(Value::as_str);
    Some(QuoteUpdate {
        venue: VENUE,
        symbol: Symbol::new(pair.to_uppercase()),
        bid: Price::from_str(field("b")?).ok()?,
        bid_size: Size::from_str(field("B")?).ok()?,
        ask: Price::from_str(field("a")?).ok()?,
        ask_size: Size::from_str(field("A")?).ok()?,
        timestamp: data
            .get("E")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    })
}

pub(crate) fn parse_order_ack(answer: &Value) -> Result<OrderAck, VenueError> {
    let order_id = answer
        .get("orderId")
        .and_then(Value::as_str)
        .ok_or_else(|| VenueError::Protocol {
            venue: VENUE,
            reason: "order answer missing orderId".to_string(),
        })?;
    let status = answer
        .get("status")
        .and_then(Value::as_str)
        .map(map_status)
        .unwrap_or(OrderStatus::Open);
    Ok(OrderAck {
        venue_order_id: order_id.to_string(),
        status,
        timestamp: Utc::now(),
    })
}

pub(crate) fn parse_order_report(answer: &Value) -> Result<OrderStatusReport, VenueError> {
    let order_id = answer
        .get("orderId")
        .and_then(Value::as_str)
        .ok_or_else(|| VenueError::Protocol {
            venue: VENUE,
            reason: "order report missing orderId".to_string(),
        })?;
    let symbol = answer
        .get("symbol")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(OrderStatusReport {
        venue: VENUE,
        client_order_id: answer
            .get("clientOrderId")
            .and_then(Value::as_str)
            .map(str::to_string),
        venue_order_id: order_id.to_string(),
        symbol: Symbol::new(symbol),
        status: answer
            .get("status")
            .and_then(Value::as_str)
            .map(map_status)
            .unwrap_or(OrderStatus::Open),
        filled_quantity: answer
            .get("executedQty")
            .and_then(Value::as_str)
            .and_then(|s| Size::from_str(s).ok())
            .unwrap_or_else(Size::zero),
        average_fill_price: answer
            .get("avgPrice")
            .and_then(Value::as_str)
            .and_then(|s| Price::from_str(s).ok()),
        timestamp: answer
            .get("updateTime")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    })
}

pub(crate) fn parse_positions(answer: &Value) -> Result<Vec<Position>, VenueError> {
    let entries = answer.as_array().ok_or_else(|| VenueError::Protocol {
        venue: VENUE,
        reason: "positions answer is not an array".to_string(),
    })?;
    let mut positions = Vec::with_capacity(entries.len());
    for entry in entries {
        let field = |key: &str| entry.get(key).and_then(Value::as_str);
        let symbol = match field("symbol") {
            Some(s) => Symbol::new(s),
            None => continue,
        };
        let size = field("size")
            .and_then(|s| Size::from_str(s).ok())
            .unwrap_or_else(Size::zero);
        if size.is_zero() {
            continue;
        }
        let price = |key: &str| {
            field(key)
                .and_then(|s| Price::from_str(s).ok())
                .unwrap_or(Price(Decimal::ZERO))
        };
        let pnl = |key: &str| {
            field(key)
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO)
        };
        positions.push(Position {
            venue: VENUE,
            symbol,
            size,
            entry_price: price("entryPrice"),
            mark_price: price("markPrice"),
            unrealized_pnl: pnl("unrealizedPnl"),
            realized_pnl: pnl("realizedPnl"),
            updated_at: entry
                .get("updatedAt")
                .and_then(Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now),
        });
    }
    Ok(positions)
}

pub(crate) fn parse_balances(answer: &Value) -> Result<Vec<Balance>, VenueError> {
    let entries = answer.as_array().ok_or_else(|| VenueError::Protocol {
        venue: VENUE,
        reason: "balances answer is not an array".to_string(),
    })?;
    let mut balances = Vec::with_capacity(entries.len());
    for entry in entries {
        let asset = match entry.get("asset").and_then(Value::as_str) {
            Some(a) => a.to_string(),
            None => continue,
        };
        let amount = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO)
        };
        balances.push(Balance {
            venue: VENUE,
            asset,
            total: amount("total"),
            available: amount("available"),
            locked: amount("locked"),
            updated_at: entry
                .get("updatedAt")
                .and_then(Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now),
        });
    }
    Ok(balances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::connector::HmacSha256Signer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_ticker_frame() {
        let frame = r#"{
            "stream": "btc-usd@ticker",
            "data": { "b": "44995", "B": "2", "a": "45005", "A": "1.2", "E": 1722945600000 }
        }"#;
        let quote = parse_ticker(frame).unwrap();
        assert_eq!(quote.symbol, Symbol::new("BTC-USD"));
        assert_eq!(quote.bid, Price::from_str("44995").unwrap());
        assert_eq!(quote.ask, Price::from_str("45005").unwrap());
        assert_eq!(quote.venue, VenueId::Lighter);
    }

    #[test]
    fn test_parse_ticker_ignores_other_frames() {
        assert!(parse_ticker(r#"{"id":1,"result":null}"#).is_none());
        assert!(parse_ticker(r#"{"stream":"btc-usd@depth","data":{}}"#).is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("NEW"), OrderStatus::Open);
        assert_eq!(map_status("PARTIALLY_FILLED"), OrderStatus::PartiallyFilled);
        assert_eq!(map_status("FILLED"), OrderStatus::Filled);
        assert_eq!(map_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(map_status("REJECTED"), OrderStatus::Rejected);
    }

    #[test]
    fn test_parse_order_report() {
        let answer = json!({
            "orderId": "L-123",
            "clientOrderId": "c-9",
            "symbol": "BTC-USD",
            "status": "FILLED",
            "executedQty": "0.5",
            "avgPrice": "45000",
            "updateTime": 1722945600000i64
        });
        let report = parse_order_report(&answer).unwrap();
        assert_eq!(report.venue_order_id, "L-123");
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.filled_quantity, Size::from_str("0.5").unwrap());
    }

    #[tokio::test]
    async fn test_fetch_positions_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "symbol": "BTC-USD", "size": "-0.25", "entryPrice": "46000",
                  "markPrice": "45000", "unrealizedPnl": "250", "realizedPnl": "0",
                  "updatedAt": 1722945600000i64 }
            ])))
            .mount(&server)
            .await;

        let bus = EventBus::new(16);
        let config = VenueConfig {
            venue: VENUE,
            rest_url: server.uri(),
            ws_url: "wss://unused.invalid/ws".to_string(),
        };
        let signer = Arc::new(HmacSha256Signer::new(VENUE, "key", "secret"));
        let connector = LighterConnector::new(config, signer, bus, &CoreConfig::default());

        let positions = connector.fetch_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, Size::from_str("-0.25").unwrap());
        assert_eq!(positions[0].venue, VenueId::Lighter);
    }

    #[tokio::test]
    async fn test_fetch_order_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let bus = EventBus::new(16);
        let config = VenueConfig {
            venue: VENUE,
            rest_url: server.uri(),
            ws_url: "wss://unused.invalid/ws".to_string(),
        };
        let signer = Arc::new(HmacSha256Signer::new(VENUE, "key", "secret"));
        let connector = LighterConnector::new(config, signer, bus, &CoreConfig::default());

        let answer = connector.fetch_order("missing").await.unwrap();
        assert!(answer.is_none());
    }
}
