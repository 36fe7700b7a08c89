use crate::bus::EventBus;
use crate::core::error::VenueError;
use crate::core::events::{
    Balance, CancelAck, ConnectionStatus, HealthEvent, OrderAck, OrderStatus, OrderStatusReport,
    Position, PriceEvent, QuoteUpdate, UnifiedOrder, VenueId,
};
use crate::types::{Price, Size, Symbol};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted outcome for the next `place_order` call
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    /// Acknowledge with a venue-assigned id
    Ack,
    /// Venue answers and refuses the order
    Reject(String),
    /// Transient protocol failure
    Protocol(String),
    /// Submission times out; outcome unknown to the caller
    Ambiguous,
    /// Respond with an ack only after the given delay
    Delay(Duration),
}

/// In-process venue used by tests and the dry-run binary. Behavior is
/// scripted per call; events are injected explicitly via the `emit_*`
/// helpers, the way a live feed would push them.
pub struct MockVenueConnector {
    venue: VenueId,
    bus: EventBus,
    connected: AtomicBool,
    /// Number of upcoming connect() calls that should fail
    connect_failures: AtomicU32,
    subscriptions: Mutex<Vec<Symbol>>,
    place_outcomes: Mutex<VecDeque<PlaceOutcome>>,
    placed: Mutex<Vec<UnifiedOrder>>,
    cancelled: Mutex<Vec<String>>,
    order_statuses: Mutex<HashMap<String, OrderStatusReport>>,
    positions: Mutex<Vec<Position>>,
    balances: Mutex<Vec<Balance>>,
    next_id: AtomicU64,
}

impl MockVenueConnector {
    pub fn new(venue: VenueId, bus: EventBus) -> Self {
        Self {
            venue,
            bus,
            connected: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            subscriptions: Mutex::new(Vec::new()),
            place_outcomes: Mutex::new(VecDeque::new()),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            order_statuses: Mutex::new(HashMap::new()),
            positions: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Script the outcome of the next `place_order` call; defaults to
    /// `Ack` when the queue is empty
    pub fn push_place_outcome(&self, outcome: PlaceOutcome) {
        self.place_outcomes.lock().unwrap().push_back(outcome);
    }

    /// Queue `n` connect failures
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Set the answer `fetch_order` gives for a client order id
    pub fn set_order_status(&self, client_order_id: impl Into<String>, report: OrderStatusReport) {
        self.order_statuses
            .lock()
            .unwrap()
            .insert(client_order_id.into(), report);
    }

    /// Remove any stored status so `fetch_order` answers "not known"
    pub fn forget_order(&self, client_order_id: &str) {
        self.order_statuses.lock().unwrap().remove(client_order_id);
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn set_balances(&self, balances: Vec<Balance>) {
        *self.balances.lock().unwrap() = balances;
    }

    /// Orders received by this venue, in arrival order
    pub fn placed_orders(&self) -> Vec<UnifiedOrder> {
        self.placed.lock().unwrap().clone()
    }

    pub fn place_calls(&self) -> usize {
        self.placed.lock().unwrap().len()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Push a normalized quote onto the bus as the live feed would
    pub fn emit_quote(&self, symbol: impl Into<Symbol>, bid: Price, ask: Price) {
        self.bus.publish_price(PriceEvent::Quote(QuoteUpdate {
            venue: self.venue,
            symbol: symbol.into(),
            bid,
            bid_size: Size::new(rust_decimal::Decimal::ONE),
            ask,
            ask_size: Size::new(rust_decimal::Decimal::ONE),
            timestamp: Utc::now(),
        }));
    }

    /// Push a venue-originated order execution update onto the bus
    pub fn emit_order_update(&self, event: crate::core::events::OrderEvent) {
        self.bus.publish_order(event);
    }

    /// Push a position update onto the bus
    pub fn emit_position(&self, position: Position) {
        self.bus.publish_position(position);
    }

    /// Push a balance update onto the bus
    pub fn emit_balance(&self, balance: Balance) {
        self.bus.publish_balance(balance);
    }

    fn next_order_id(&self) -> String {
        format!(
            "{}-{}",
            self.venue.as_str(),
            self.next_id.fetch_add(1, Ordering::SeqCst)
        )
    }
}

#[async_trait]
impl super::connector::VenueConnector for MockVenueConnector {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn connect(&self) -> Result<(), VenueError> {
        let pending = self.connect_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.connect_failures.store(pending - 1, Ordering::SeqCst);
            return Err(VenueError::Unreachable {
                venue: self.venue,
                reason: "scripted connect failure".to_string(),
            });
        }
        let was_connected = self.connected.swap(true, Ordering::SeqCst);
        if !was_connected {
            self.bus.publish_health(HealthEvent::connection(
                self.venue,
                ConnectionStatus::Connected,
                None,
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VenueError> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            self.bus.publish_health(HealthEvent::connection(
                self.venue,
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
        self.placed.lock().unwrap().push(order.clone());
        let outcome = self
            .place_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PlaceOutcome::Ack);

        let ack = |venue_order_id: String, statuses: &Mutex<HashMap<String, OrderStatusReport>>| {
            let report = OrderStatusReport {
                venue: self.venue,
                client_order_id: Some(order.client_order_id.clone()),
                venue_order_id: venue_order_id.clone(),
                symbol: order.symbol.clone(),
                status: OrderStatus::Open,
                filled_quantity: Size::zero(),
                average_fill_price: None,
                timestamp: Utc::now(),
            };
            statuses
                .lock()
                .unwrap()
                .insert(order.client_order_id.clone(), report);
            OrderAck {
                venue_order_id,
                status: OrderStatus::Open,
                timestamp: Utc::now(),
            }
        };

        match outcome {
            PlaceOutcome::Ack => Ok(ack(self.next_order_id(), &self.order_statuses)),
            PlaceOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ack(self.next_order_id(), &self.order_statuses))
            }
            PlaceOutcome::Reject(reason) => Err(VenueError::Rejected {
                venue: self.venue,
                reason,
            }),
            PlaceOutcome::Protocol(reason) => Err(VenueError::Protocol {
                venue: self.venue,
                reason,
            }),
            PlaceOutcome::Ambiguous => Err(VenueError::Ambiguous {
                venue: self.venue,
                reason: "scripted submit timeout".to_string(),
            }),
        }
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck, VenueError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(venue_order_id.to_string());
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
        Ok(self
            .order_statuses
            .lock()
            .unwrap()
            .get(client_order_id)
            .cloned())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), VenueError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        for symbol in symbols {
            if !subscriptions.contains(symbol) {
                subscriptions.push(symbol.clone());
            }
        }
        Ok(())
    }
}
