use crate::types::{Price, Size, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Venue-assigned order identifier
pub type VenueOrderId = String;

/// Client-assigned idempotent order identifier
pub type ClientOrderId = String;

/// Identity of one execution venue. The supported set is fixed at
/// process start; `Ord` gives the deterministic tie-break order used
/// by automatic routing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Hyperliquid,
    Lighter,
    Tradexyz,
}

impl VenueId {
    /// All supported venues, in identity order
    pub const ALL: [VenueId; 3] = [VenueId::Hyperliquid, VenueId::Lighter, VenueId::Tradexyz];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Hyperliquid => "hyperliquid",
            VenueId::Lighter => "lighter",
            VenueId::Tradexyz => "tradexyz",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

impl OrderType {
    /// Limit and stop-limit orders carry a limit price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Stop orders carry a trigger price
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::StopMarket | OrderType::StopLimit)
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    GoodTillCancelled,
    ImmediateOrCancel,
    FillOrKill,
}

/// Order lifecycle status.
///
/// `Unknown` marks an ambiguous submission outcome; it is non-terminal
/// and may only advance via reconciliation or a venue execution update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Failed,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Failed
        )
    }

    /// States from which a cancel request is accepted
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::Open)
    }
}

/// Unified order request, immutable once submitted to a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Size,
    /// Limit price; required for limit/stop-limit types
    pub price: Option<Price>,
    /// Trigger price; required for stop types
    pub stop_price: Option<Price>,
    pub time_in_force: TimeInForce,
    /// Explicit target venue; `None` requests automatic routing
    pub venue: Option<VenueId>,
    /// Client-assigned idempotent identifier
    pub client_order_id: ClientOrderId,
    pub created_at: DateTime<Utc>,
}

impl UnifiedOrder {
    /// Create a market order; venue unset means automatic routing
    pub fn market(symbol: impl Into<Symbol>, side: OrderSide, quantity: Size) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::ImmediateOrCancel,
            venue: None,
            client_order_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Create a limit order; venue unset means automatic routing
    pub fn limit(symbol: impl Into<Symbol>, side: OrderSide, quantity: Size, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: TimeInForce::GoodTillCancelled,
            venue: None,
            client_order_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Create a stop-market order
    pub fn stop_market(
        symbol: impl Into<Symbol>,
        side: OrderSide,
        quantity: Size,
        stop_price: Price,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::StopMarket,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: TimeInForce::GoodTillCancelled,
            venue: None,
            client_order_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Set the target venue (builder pattern)
    pub fn with_venue(mut self, venue: VenueId) -> Self {
        self.venue = Some(venue);
        self
    }

    /// Set the client order id (builder pattern)
    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = client_order_id.into();
        self
    }

    /// Set the time in force (builder pattern)
    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }
}

/// Acknowledgement returned by a venue for an accepted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub venue_order_id: VenueOrderId,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned by a venue for a cancel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub venue_order_id: VenueOrderId,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time order status answer from a venue, used for
/// reconciliation of ambiguous submissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub venue: VenueId,
    pub client_order_id: Option<ClientOrderId>,
    pub venue_order_id: VenueOrderId,
    pub symbol: Symbol,
    pub status: OrderStatus,
    pub filled_quantity: Size,
    pub average_fill_price: Option<Price>,
    pub timestamp: DateTime<Utc>,
}

/// Server-side lifecycle record for one client order id.
/// Owned by the orchestrator; mutated only through its state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: UnifiedOrder,
    /// Venue the order was (or is being) routed to
    pub venue: VenueId,
    /// Venue-assigned id; None until acknowledged
    pub venue_order_id: Option<VenueOrderId>,
    pub status: OrderStatus,
    pub filled_quantity: Size,
    pub average_fill_price: Option<Price>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(order: UnifiedOrder, venue: VenueId) -> Self {
        Self {
            order,
            venue,
            venue_order_id: None,
            status: OrderStatus::Pending,
            filled_quantity: Size::zero(),
            average_fill_price: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// One logical position per (venue, symbol); superseded in place on
/// each update, never appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub venue: VenueId,
    pub symbol: Symbol,
    /// Signed: positive long, negative short
    pub size: Size,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Notional value at the current mark price
    pub fn notional(&self) -> Decimal {
        self.size.abs().value() * self.mark_price.value()
    }
}

/// One current balance per (venue, asset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub venue: VenueId,
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Normalized top-of-book update from one venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid: Price,
    pub bid_size: Size,
    pub ask: Price,
    pub ask_size: Size,
    pub timestamp: DateTime<Utc>,
}

/// One venue's contribution to an aggregated price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSource {
    pub venue: VenueId,
    pub bid: Price,
    pub ask: Price,
    pub timestamp: DateTime<Utc>,
}

/// Best bid/ask across all eligible venues for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub symbol: Symbol,
    pub best_bid: Price,
    pub best_bid_venue: VenueId,
    pub best_ask: Price,
    pub best_ask_venue: VenueId,
    /// Per-venue quotes that contributed to this computation
    pub sources: SmallVec<[PriceSource; 4]>,
    pub computed_at: DateTime<Utc>,
}

impl AggregatedPrice {
    pub fn spread(&self) -> Price {
        self.best_ask - self.best_bid
    }
}

/// Circuit breaker state for one venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Connection state of a venue's live feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Reconnecting,
}

/// Observable health snapshot of one venue, served by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueHealth {
    pub venue: VenueId,
    pub connection: ConnectionStatus,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    /// Failed reconnect attempts since the last successful connect;
    /// automatic routing uses this as a tie-breaker
    pub reconnect_failures: u32,
    pub last_transition: DateTime<Utc>,
}

/// What changed in a venue's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthKind {
    /// Live feed went up or down; published by the connector on every
    /// connect/disconnect transition
    Connection(ConnectionStatus),
    /// Circuit breaker changed state; published by the registry
    Circuit(CircuitState),
}

/// Health-topic event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub venue: VenueId,
    pub kind: HealthKind,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthEvent {
    pub fn connection(venue: VenueId, status: ConnectionStatus, reason: Option<String>) -> Self {
        Self {
            venue,
            kind: HealthKind::Connection(status),
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn circuit(venue: VenueId, state: CircuitState) -> Self {
        Self {
            venue,
            kind: HealthKind::Circuit(state),
            reason: None,
            timestamp: Utc::now(),
        }
    }
}

/// Who produced an order event: the venue stream or the router's
/// own lifecycle machine. The router only consumes venue-originated
/// events, so it never reacts to its own publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Venue,
    Router,
}

/// Order update carried on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub origin: EventOrigin,
    pub venue: VenueId,
    pub client_order_id: Option<ClientOrderId>,
    pub venue_order_id: Option<VenueOrderId>,
    pub symbol: Symbol,
    pub status: OrderStatus,
    pub filled_quantity: Size,
    pub average_fill_price: Option<Price>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    /// Lifecycle event published by the router for a record transition
    pub fn from_record(record: &OrderRecord) -> Self {
        Self {
            origin: EventOrigin::Router,
            venue: record.venue,
            client_order_id: Some(record.order.client_order_id.clone()),
            venue_order_id: record.venue_order_id.clone(),
            symbol: record.order.symbol.clone(),
            status: record.status,
            filled_quantity: record.filled_quantity,
            average_fill_price: record.average_fill_price,
            error: record.error.clone(),
            timestamp: record.updated_at,
        }
    }
}

/// Whether a venue is contributing data to the consolidated portfolio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenuePresence {
    Online,
    Offline,
}

/// Per-venue slice of the consolidated portfolio. Venues with no data
/// are carried as `Offline` rather than omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueBreakdown {
    pub venue: VenueId,
    pub presence: VenuePresence,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub position_count: usize,
    pub balance_count: usize,
}

/// Consolidated, venue-tagged view over all positions and balances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioView {
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_notional: Decimal,
    pub positions: Vec<Position>,
    pub balances: Vec<Balance>,
    pub venues: Vec<VenueBreakdown>,
    pub active_orders: usize,
    pub updated_at: DateTime<Utc>,
}

/// Price-topic event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceEvent {
    /// Normalized per-venue quote from a connector
    Quote(QuoteUpdate),
    /// Recomputed cross-venue best bid/ask
    Aggregated(AggregatedPrice),
    /// No venue currently eligible for the symbol; the previous value,
    /// if any, is carried along explicitly marked as last-known
    NoLiquidity {
        symbol: Symbol,
        last: Option<AggregatedPrice>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_venue_id_order_is_deterministic() {
        assert!(VenueId::Hyperliquid < VenueId::Lighter);
        assert!(VenueId::Lighter < VenueId::Tradexyz);
        assert_eq!(VenueId::Lighter.as_str(), "lighter");
    }

    #[test]
    fn test_order_type_price_requirements() {
        assert!(OrderType::Limit.requires_price());
        assert!(OrderType::StopLimit.requires_price());
        assert!(!OrderType::Market.requires_price());
        assert!(OrderType::StopMarket.requires_stop_price());
        assert!(!OrderType::Limit.requires_stop_price());
    }

    #[test]
    fn test_order_status_terminality() {
        for status in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_cancellable());
        }
        assert!(!OrderStatus::Unknown.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Submitted.is_cancellable());
        assert!(OrderStatus::Open.is_cancellable());
    }

    #[test]
    fn test_unified_order_constructors() {
        let order = UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Buy,
            Size::from_str("0.5").unwrap(),
            Price::from_str("45000").unwrap(),
        )
        .with_venue(VenueId::Hyperliquid);

        assert_eq!(order.venue, Some(VenueId::Hyperliquid));
        assert_eq!(order.order_type, OrderType::Limit);
        assert!(order.price.is_some());
        assert!(!order.client_order_id.is_empty());

        let market = UnifiedOrder::market("ETH-USD", OrderSide::Sell, Size::from_str("1").unwrap());
        assert_eq!(market.venue, None);
        assert_eq!(market.price, None);
        assert_eq!(market.time_in_force, TimeInForce::ImmediateOrCancel);
    }

    #[test]
    fn test_order_record_initial_state() {
        let order = UnifiedOrder::market("BTC-USD", OrderSide::Buy, Size::from_str("1").unwrap());
        let record = OrderRecord::new(order, VenueId::Lighter);
        assert_eq!(record.status, OrderStatus::Pending);
        assert_eq!(record.venue_order_id, None);
        assert!(record.filled_quantity.is_zero());
    }

    #[test]
    fn test_position_notional() {
        let position = Position {
            venue: VenueId::Hyperliquid,
            symbol: Symbol::new("BTC-USD"),
            size: Size::from_str("-2").unwrap(),
            entry_price: Price::from_str("44000").unwrap(),
            mark_price: Price::from_str("45000").unwrap(),
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        assert_eq!(position.notional(), Decimal::from_str("90000").unwrap());
    }

    #[test]
    fn test_order_event_from_record_tags_router_origin() {
        let order = UnifiedOrder::market("BTC-USD", OrderSide::Buy, Size::from_str("1").unwrap());
        let record = OrderRecord::new(order, VenueId::Tradexyz);
        let event = OrderEvent::from_record(&record);
        assert_eq!(event.origin, EventOrigin::Router);
        assert_eq!(event.venue, VenueId::Tradexyz);
        assert_eq!(event.status, OrderStatus::Pending);
    }
}
