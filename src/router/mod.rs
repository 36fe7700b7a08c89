//! Order routing and lifecycle orchestration.
//!
//! One [`OrderRecord`] per client order id, advanced only through the
//! lifecycle state machine. Submissions to the same client id are
//! serialized; different ids proceed concurrently. Ambiguous outcomes
//! park the record in `Unknown` until reconciliation resolves them.

use crate::aggregation::AggregationEngine;
use crate::bus::EventBus;
use crate::core::config::CoreConfig;
use crate::core::error::{RouteError, VenueError};
use crate::core::events::{
    CircuitState, EventOrigin, OrderEvent, OrderRecord, OrderStatus, OrderStatusReport,
    UnifiedOrder, VenueId,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Legal lifecycle transitions. Terminal states only admit themselves
/// (fill-detail refreshes); `Unknown` may advance anywhere on venue
/// evidence, and any non-terminal state may sink to `Unknown`.
fn may_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    if from == to {
        return true;
    }
    match from {
        Pending => matches!(to, Submitted | Failed | Unknown),
        Submitted => matches!(
            to,
            Open | PartiallyFilled | Filled | Cancelled | Rejected | Failed | Unknown
        ),
        Open => matches!(to, PartiallyFilled | Filled | Cancelled | Rejected | Unknown),
        PartiallyFilled => matches!(to, Filled | Cancelled | Unknown),
        Unknown => true,
        Filled | Cancelled | Rejected | Failed => false,
    }
}

/// The order router / orchestrator. Owns the record table exclusively;
/// everything else observes records through the order topic or the
/// read accessors.
pub struct OrderRouter {
    registry: Arc<crate::venues::registry::VenueRegistry>,
    engine: Arc<AggregationEngine>,
    bus: EventBus,
    config: CoreConfig,
    records: DashMap<String, OrderRecord>,
    submit_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl OrderRouter {
    pub fn new(
        registry: Arc<crate::venues::registry::VenueRegistry>,
        engine: Arc<AggregationEngine>,
        bus: EventBus,
        config: CoreConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            bus,
            config,
            records: DashMap::new(),
            submit_locks: DashMap::new(),
        }
    }

    fn key_lock(&self, client_order_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.submit_locks
            .entry(client_order_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Store a record mutation and publish the transition before
    /// returning, so subscribers observe every intermediate state
    fn store_and_publish(&self, record: &OrderRecord) {
        self.records
            .insert(record.order.client_order_id.clone(), record.clone());
        self.bus.publish_order(OrderEvent::from_record(record));
        if record.status.is_terminal() {
            self.submit_locks.remove(&record.order.client_order_id);
        }
    }

    fn validate(&self, order: &UnifiedOrder) -> Result<(), RouteError> {
        if order.symbol.is_empty() {
            return Err(RouteError::Validation {
                field: "symbol",
                message: "symbol is required".to_string(),
            });
        }
        if !self.config.symbols.contains(&order.symbol) {
            return Err(RouteError::Validation {
                field: "symbol",
                message: format!("unknown symbol {}", order.symbol),
            });
        }
        if !order.quantity.is_positive() {
            return Err(RouteError::Validation {
                field: "quantity",
                message: "quantity must be positive".to_string(),
            });
        }
        match (order.order_type.requires_price(), order.price) {
            (true, None) => {
                return Err(RouteError::Validation {
                    field: "price",
                    message: format!("{:?} orders require a price", order.order_type),
                })
            }
            (false, Some(_)) => {
                return Err(RouteError::Validation {
                    field: "price",
                    message: format!("{:?} orders do not take a price", order.order_type),
                })
            }
            (true, Some(price)) if !price.is_positive() => {
                return Err(RouteError::Validation {
                    field: "price",
                    message: "price must be positive".to_string(),
                })
            }
            _ => {}
        }
        if order.order_type.requires_stop_price() && order.stop_price.is_none() {
            return Err(RouteError::Validation {
                field: "stop_price",
                message: format!("{:?} orders require a stop price", order.order_type),
            });
        }
        if let Some(venue) = order.venue {
            if !self.registry.contains(venue) {
                return Err(RouteError::Validation {
                    field: "venue",
                    message: format!("venue {} is not registered", venue),
                });
            }
        }
        Ok(())
    }

    /// Eligible venues for an automatic order, best first: best price
    /// for the order's side, then fewest reconnect failures, then
    /// venue identity order. Venues without a live quote rank last.
    fn rank_candidates(&self, order: &UnifiedOrder) -> Vec<VenueId> {
        let eligible: Vec<VenueId> = self
            .registry
            .venue_ids()
            .into_iter()
            .filter(|&v| self.registry.is_eligible(v))
            .collect();

        let sources: HashMap<VenueId, (Decimal, Decimal)> = match self.engine.current(&order.symbol)
        {
            Some(snapshot) if !snapshot.stale => snapshot
                .price
                .sources
                .iter()
                .map(|s| (s.venue, (s.bid.value(), s.ask.value())))
                .collect(),
            _ => HashMap::new(),
        };

        // Lower key is better: buys want the lowest ask, sells the
        // highest bid
        let price_key = |venue: VenueId| -> Option<Decimal> {
            sources.get(&venue).map(|(bid, ask)| match order.side {
                crate::core::events::OrderSide::Buy => *ask,
                crate::core::events::OrderSide::Sell => -*bid,
            })
        };
        let reconnects = |venue: VenueId| -> u32 {
            self.registry
                .handle(venue)
                .map(|h| h.reconnect_failures())
                .unwrap_or(u32::MAX)
        };

        let mut ranked = eligible;
        ranked.sort_by(|&a, &b| {
            match (price_key(a), price_key(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| reconnects(a).cmp(&reconnects(b)))
            .then_with(|| a.cmp(&b))
        });
        ranked
    }

    /// Route one order to exactly one venue.
    ///
    /// Validation failures create a record and sink it `Pending ->
    /// Failed`; retryable refusals (`VenueUnavailable`,
    /// `NoEligibleVenue`) leave no record so the caller may retry the
    /// same client order id later. An ambiguous submission returns the
    /// record parked in `Unknown`; it is never resubmitted.
    pub async fn route_order(&self, order: UnifiedOrder) -> Result<OrderRecord, RouteError> {
        let lock = self.key_lock(&order.client_order_id);
        let _guard = lock.lock().await;

        if self.records.contains_key(&order.client_order_id) {
            return Err(RouteError::DuplicateClientOrderId(
                order.client_order_id.clone(),
            ));
        }

        if let Err(e) = self.validate(&order) {
            let mut record = OrderRecord::new(order, VenueId::ALL[0]);
            if let Some(venue) = record.order.venue {
                record.venue = venue;
            }
            self.store_and_publish(&record);
            record.status = OrderStatus::Failed;
            record.error = Some(e.to_string());
            record.updated_at = Utc::now();
            self.store_and_publish(&record);
            return Err(e);
        }

        let candidates: Vec<VenueId> = match order.venue {
            Some(venue) => {
                // Explicit venue: never silently fall back
                if self.registry.circuit_state(venue) == Some(CircuitState::Open) {
                    return Err(RouteError::VenueUnavailable(venue));
                }
                vec![venue]
            }
            None => {
                let ranked = self.rank_candidates(&order);
                if ranked.is_empty() {
                    return Err(RouteError::NoEligibleVenue);
                }
                // Automatic routing retries once on the next-best venue
                ranked.into_iter().take(2).collect()
            }
        };

        let mut record = OrderRecord::new(order, candidates[0]);
        self.store_and_publish(&record);

        let attempts = candidates.len();
        for (attempt, &venue) in candidates.iter().enumerate() {
            record.venue = venue;
            record.status = OrderStatus::Submitted;
            record.updated_at = Utc::now();
            self.store_and_publish(&record);

            match self.registry.place_order(venue, &record.order).await {
                Ok(ack) => {
                    record.venue_order_id = Some(ack.venue_order_id);
                    record.status = if may_transition(OrderStatus::Submitted, ack.status) {
                        ack.status
                    } else {
                        OrderStatus::Open
                    };
                    record.updated_at = Utc::now();
                    self.store_and_publish(&record);
                    info!(
                        client_order_id = %record.order.client_order_id,
                        venue = %venue,
                        "order accepted"
                    );
                    return Ok(record);
                }
                Err(e @ VenueError::Ambiguous { .. }) => {
                    // The venue may already hold this order; park it
                    // for reconciliation and never resubmit
                    record.status = OrderStatus::Unknown;
                    record.error = Some(e.to_string());
                    record.updated_at = Utc::now();
                    self.store_and_publish(&record);
                    warn!(
                        client_order_id = %record.order.client_order_id,
                        venue = %venue,
                        "ambiguous submission outcome, awaiting reconciliation"
                    );
                    return Ok(record);
                }
                Err(e) => {
                    let last_attempt = attempt + 1 == attempts;
                    warn!(
                        client_order_id = %record.order.client_order_id,
                        venue = %venue,
                        error = %e,
                        "submission failed"
                    );
                    if last_attempt {
                        record.status = match e {
                            VenueError::Rejected { .. } => OrderStatus::Rejected,
                            _ => OrderStatus::Failed,
                        };
                        record.error = Some(e.to_string());
                        record.updated_at = Utc::now();
                        self.store_and_publish(&record);
                        return Err(e.into());
                    }
                }
            }
        }
        unreachable!("submission loop always returns on the last attempt")
    }

    /// Cancel an order. Valid from `Submitted`/`Open`; a no-op
    /// returning the current record once terminal; `OrderNotFound` for
    /// unknown ids.
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<OrderRecord, RouteError> {
        let lock = self.key_lock(client_order_id);
        let _guard = lock.lock().await;

        let mut record = self
            .records
            .get(client_order_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RouteError::OrderNotFound(client_order_id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(record);
        }
        if !record.status.is_cancellable() {
            return Err(RouteError::CancelRejected {
                client_order_id: client_order_id.to_string(),
                status: record.status,
            });
        }
        let venue_order_id = match record.venue_order_id.clone() {
            Some(id) => id,
            // Submission still in flight; there is no venue id to
            // address the cancel to yet
            None => {
                return Err(RouteError::CancelRejected {
                    client_order_id: client_order_id.to_string(),
                    status: record.status,
                })
            }
        };

        match self.registry.cancel_order(record.venue, &venue_order_id).await {
            Ok(ack) => {
                record.status = if may_transition(record.status, ack.status) {
                    ack.status
                } else {
                    OrderStatus::Cancelled
                };
                record.updated_at = Utc::now();
                self.store_and_publish(&record);
                Ok(record)
            }
            Err(e @ VenueError::Ambiguous { .. }) => {
                record.status = OrderStatus::Unknown;
                record.error = Some(e.to_string());
                record.updated_at = Utc::now();
                self.store_and_publish(&record);
                Ok(record)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read accessor for one record
    pub fn get_order(&self, client_order_id: &str) -> Option<OrderRecord> {
        self.records.get(client_order_id).map(|r| r.value().clone())
    }

    /// All records still in flight
    pub fn open_orders(&self) -> Vec<OrderRecord> {
        self.records
            .iter()
            .filter(|r| !r.value().status.is_terminal())
            .map(|r| r.value().clone())
            .collect()
    }

    /// Apply a venue-originated execution update to its record.
    /// Updates older than the record are dropped, as are transitions
    /// the state machine forbids.
    pub async fn apply_venue_event(&self, event: &OrderEvent) {
        if event.origin != EventOrigin::Venue {
            return;
        }
        let client_order_id = match &event.client_order_id {
            Some(id) => id.clone(),
            None => return,
        };
        let lock = self.key_lock(&client_order_id);
        let _guard = lock.lock().await;

        let mut record = match self.records.get(&client_order_id) {
            Some(r) => r.value().clone(),
            None => return,
        };
        if event.timestamp < record.updated_at {
            debug!(client_order_id = %client_order_id, "stale execution update dropped");
            return;
        }
        if !may_transition(record.status, event.status) {
            debug!(
                client_order_id = %client_order_id,
                from = ?record.status,
                to = ?event.status,
                "illegal transition dropped"
            );
            return;
        }
        record.status = event.status;
        record.filled_quantity = event.filled_quantity;
        if event.average_fill_price.is_some() {
            record.average_fill_price = event.average_fill_price;
        }
        if record.venue_order_id.is_none() {
            record.venue_order_id = event.venue_order_id.clone();
        }
        record.updated_at = event.timestamp;
        self.store_and_publish(&record);
    }

    /// One reconciliation pass: resolve every `Unknown` record through
    /// a status query against its venue. A definitive not-found answer
    /// fails the record; the submission was never retried, so nothing
    /// can double-execute.
    pub async fn reconcile_once(&self) {
        let unknown: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.value().status == OrderStatus::Unknown)
            .map(|r| r.key().clone())
            .collect();

        for client_order_id in unknown {
            let lock = self.key_lock(&client_order_id);
            let _guard = lock.lock().await;

            let mut record = match self.records.get(&client_order_id) {
                Some(r) => r.value().clone(),
                None => continue,
            };
            if record.status != OrderStatus::Unknown {
                continue;
            }
            match self
                .registry
                .fetch_order(record.venue, &client_order_id)
                .await
            {
                Ok(Some(report)) => {
                    self.resolve_unknown(&mut record, &report);
                }
                Ok(None) => {
                    record.status = OrderStatus::Failed;
                    record.error =
                        Some("order unknown to venue after ambiguous outcome".to_string());
                    record.updated_at = Utc::now();
                    self.store_and_publish(&record);
                    info!(client_order_id = %client_order_id, "reconciled ambiguous order as failed");
                }
                Err(e) => {
                    debug!(
                        client_order_id = %client_order_id,
                        error = %e,
                        "reconciliation attempt failed, will retry"
                    );
                }
            }
        }
    }

    fn resolve_unknown(&self, record: &mut OrderRecord, report: &OrderStatusReport) {
        record.status = report.status;
        record.venue_order_id = Some(report.venue_order_id.clone());
        record.filled_quantity = report.filled_quantity;
        if report.average_fill_price.is_some() {
            record.average_fill_price = report.average_fill_price;
        }
        record.error = None;
        record.updated_at = Utc::now();
        self.store_and_publish(record);
        info!(
            client_order_id = %record.order.client_order_id,
            status = ?record.status,
            "reconciled ambiguous order from venue status"
        );
    }

    /// Run the router's background work: venue execution updates and
    /// the reconciliation cadence
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut orders = self.bus.subscribe_orders();
        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = orders.recv() => {
                        self.apply_venue_event(&event).await;
                    }
                    _ = reconcile.tick() => {
                        self.reconcile_once().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{OrderSide, OrderType};
    use crate::types::{Price, Size, Symbol};
    use crate::venues::connector::VenueConnector;
    use crate::venues::mock::{MockVenueConnector, PlaceOutcome};
    use std::str::FromStr;
    use std::time::Duration;

    struct Fixture {
        bus: EventBus,
        mocks: Vec<Arc<MockVenueConnector>>,
        registry: Arc<crate::venues::registry::VenueRegistry>,
        engine: Arc<AggregationEngine>,
        router: OrderRouter,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new(128);
        let config = CoreConfig {
            submit_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_millis(50),
            ..CoreConfig::default()
        };
        let mocks: Vec<Arc<MockVenueConnector>> = VenueId::ALL
            .iter()
            .map(|&v| Arc::new(MockVenueConnector::new(v, bus.clone())))
            .collect();
        let connectors: Vec<Arc<dyn VenueConnector>> = mocks
            .iter()
            .map(|m| m.clone() as Arc<dyn VenueConnector>)
            .collect();
        let registry = Arc::new(crate::venues::registry::VenueRegistry::new(
            bus.clone(),
            config.clone(),
            connectors,
        ));
        let engine = Arc::new(AggregationEngine::new(
            registry.clone(),
            bus.clone(),
            &config,
        ));
        let router = OrderRouter::new(registry.clone(), engine.clone(), bus.clone(), config);
        Fixture {
            bus,
            mocks,
            registry,
            engine,
            router,
        }
    }

    fn quote(venue: VenueId, bid: &str, ask: &str) -> crate::core::events::QuoteUpdate {
        crate::core::events::QuoteUpdate {
            venue,
            symbol: Symbol::new("BTC-USD"),
            bid: Price::from_str(bid).unwrap(),
            bid_size: Size::from_str("1").unwrap(),
            ask: Price::from_str(ask).unwrap(),
            ask_size: Size::from_str("1").unwrap(),
            timestamp: Utc::now(),
        }
    }

    fn explicit_order(venue: VenueId) -> UnifiedOrder {
        UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Buy,
            Size::from_str("0.5").unwrap(),
            Price::from_str("45000").unwrap(),
        )
        .with_venue(venue)
    }

    #[tokio::test]
    async fn test_explicit_order_reaches_named_venue() {
        let f = fixture();
        let record = f
            .router
            .route_order(explicit_order(VenueId::Lighter))
            .await
            .unwrap();
        assert_eq!(record.venue, VenueId::Lighter);
        assert_eq!(record.status, OrderStatus::Open);
        assert!(record.venue_order_id.is_some());
        assert_eq!(f.mocks[1].place_calls(), 1);
        assert_eq!(f.mocks[0].place_calls(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_sinks_record_without_connector_call() {
        let f = fixture();
        let order = UnifiedOrder {
            price: None,
            ..explicit_order(VenueId::Hyperliquid)
        };
        let err = f.router.route_order(order.clone()).await.unwrap_err();
        assert!(matches!(err, RouteError::Validation { field: "price", .. }));

        let record = f.router.get_order(&order.client_order_id).unwrap();
        assert_eq!(record.status, OrderStatus::Failed);
        assert!(record.error.is_some());
        assert_eq!(f.mocks[0].place_calls(), 0);
    }

    #[tokio::test]
    async fn test_market_order_with_price_is_invalid() {
        let f = fixture();
        let mut order =
            UnifiedOrder::market("BTC-USD", OrderSide::Buy, Size::from_str("1").unwrap());
        order.price = Some(Price::from_str("45000").unwrap());
        let err = f.router.route_order(order).await.unwrap_err();
        assert!(matches!(err, RouteError::Validation { field: "price", .. }));
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let f = fixture();
        let order = UnifiedOrder::market("DOGE-USD", OrderSide::Buy, Size::from_str("1").unwrap());
        let err = f.router.route_order(order).await.unwrap_err();
        assert!(matches!(err, RouteError::Validation { field: "symbol", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_rejected_once_recorded() {
        let f = fixture();
        let order = explicit_order(VenueId::Hyperliquid);
        f.router.route_order(order.clone()).await.unwrap();

        let err = f.router.route_order(order.clone()).await.unwrap_err();
        assert!(matches!(err, RouteError::DuplicateClientOrderId(_)));
        // Exactly one record and one connector call
        assert_eq!(f.mocks[0].place_calls(), 1);
    }

    #[tokio::test]
    async fn test_explicit_venue_open_breaker_short_circuits() {
        let f = fixture();
        let breaker = f.registry.handle(VenueId::Hyperliquid).unwrap().breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }

        let order = explicit_order(VenueId::Hyperliquid);
        let err = f.router.route_order(order.clone()).await.unwrap_err();
        assert_eq!(err, RouteError::VenueUnavailable(VenueId::Hyperliquid));
        assert_eq!(f.mocks[0].place_calls(), 0);
        // No record: the caller may retry the same id later
        assert!(f.router.get_order(&order.client_order_id).is_none());
    }

    #[tokio::test]
    async fn test_auto_routing_picks_best_ask_for_buy() {
        let f = fixture();
        f.engine.apply_quote(quote(VenueId::Hyperliquid, "44990", "45010"));
        f.engine.apply_quote(quote(VenueId::Lighter, "44995", "45005"));

        let order = UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Buy,
            Size::from_str("1").unwrap(),
            Price::from_str("45005").unwrap(),
        );
        let record = f.router.route_order(order).await.unwrap();
        assert_eq!(record.venue, VenueId::Lighter);
    }

    #[tokio::test]
    async fn test_auto_routing_picks_best_bid_for_sell() {
        let f = fixture();
        f.engine.apply_quote(quote(VenueId::Hyperliquid, "44990", "45010"));
        f.engine.apply_quote(quote(VenueId::Lighter, "44995", "45005"));

        let order = UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Sell,
            Size::from_str("1").unwrap(),
            Price::from_str("44990").unwrap(),
        );
        let record = f.router.route_order(order).await.unwrap();
        assert_eq!(record.venue, VenueId::Lighter);
    }

    #[tokio::test]
    async fn test_auto_routing_retries_next_best_once() {
        let f = fixture();
        f.engine.apply_quote(quote(VenueId::Hyperliquid, "44990", "45000"));
        f.engine.apply_quote(quote(VenueId::Lighter, "44995", "45005"));

        // Best ask is Hyperliquid; it fails cleanly, Lighter absorbs
        f.mocks[0].push_place_outcome(PlaceOutcome::Protocol("drop".to_string()));
        let order = UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Buy,
            Size::from_str("1").unwrap(),
            Price::from_str("45005").unwrap(),
        );
        let record = f.router.route_order(order).await.unwrap();
        assert_eq!(record.venue, VenueId::Lighter);
        assert_eq!(f.mocks[0].place_calls(), 1);
        assert_eq!(f.mocks[1].place_calls(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_outcome_is_never_retried() {
        let f = fixture();
        f.engine.apply_quote(quote(VenueId::Hyperliquid, "44990", "45000"));
        f.engine.apply_quote(quote(VenueId::Lighter, "44995", "45005"));

        f.mocks[0].push_place_outcome(PlaceOutcome::Ambiguous);
        let order = UnifiedOrder::limit(
            "BTC-USD",
            OrderSide::Buy,
            Size::from_str("1").unwrap(),
            Price::from_str("45005").unwrap(),
        );
        let record = f.router.route_order(order).await.unwrap();
        assert_eq!(record.status, OrderStatus::Unknown);
        assert_eq!(record.venue, VenueId::Hyperliquid);
        // No fallback submission happened anywhere
        assert_eq!(f.mocks[0].place_calls(), 1);
        assert_eq!(f.mocks[1].place_calls(), 0);
        assert_eq!(f.mocks[2].place_calls(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_submitted_before_terminal() {
        let f = fixture();
        let mut orders = f.bus.subscribe_orders();
        f.router
            .route_order(explicit_order(VenueId::Hyperliquid))
            .await
            .unwrap();

        let statuses: Vec<OrderStatus> = std::iter::from_fn(|| orders.try_recv())
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Pending,
                OrderStatus::Submitted,
                OrderStatus::Open
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_from_open_cancels_at_venue() {
        let f = fixture();
        let record = f
            .router
            .route_order(explicit_order(VenueId::Hyperliquid))
            .await
            .unwrap();

        let cancelled = f
            .router
            .cancel_order(&record.order.client_order_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(f.mocks[0].cancel_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_terminal_is_noop_with_current_status() {
        let f = fixture();
        let record = f
            .router
            .route_order(explicit_order(VenueId::Hyperliquid))
            .await
            .unwrap();
        f.router
            .cancel_order(&record.order.client_order_id)
            .await
            .unwrap();

        // Second cancel: no new venue call, current status returned
        let again = f
            .router
            .cancel_order(&record.order.client_order_id)
            .await
            .unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(f.mocks[0].cancel_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_rejected_while_awaiting_reconciliation() {
        let f = fixture();
        f.mocks[0].push_place_outcome(PlaceOutcome::Ambiguous);
        let order = explicit_order(VenueId::Hyperliquid);
        let record = f.router.route_order(order.clone()).await.unwrap();
        assert_eq!(record.status, OrderStatus::Unknown);

        let err = f
            .router
            .cancel_order(&order.client_order_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouteError::CancelRejected {
                status: OrderStatus::Unknown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_fails() {
        let f = fixture();
        let err = f.router.cancel_order("nope").await.unwrap_err();
        assert_eq!(err, RouteError::OrderNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_venue_event_advances_record() {
        let f = fixture();
        let record = f
            .router
            .route_order(explicit_order(VenueId::Hyperliquid))
            .await
            .unwrap();

        let event = OrderEvent {
            origin: EventOrigin::Venue,
            venue: VenueId::Hyperliquid,
            client_order_id: Some(record.order.client_order_id.clone()),
            venue_order_id: record.venue_order_id.clone(),
            symbol: Symbol::new("BTC-USD"),
            status: OrderStatus::Filled,
            filled_quantity: Size::from_str("0.5").unwrap(),
            average_fill_price: Some(Price::from_str("45000").unwrap()),
            error: None,
            timestamp: Utc::now(),
        };
        f.router.apply_venue_event(&event).await;

        let updated = f.router.get_order(&record.order.client_order_id).unwrap();
        assert_eq!(updated.status, OrderStatus::Filled);
        assert_eq!(updated.filled_quantity, Size::from_str("0.5").unwrap());
    }

    #[tokio::test]
    async fn test_terminal_record_ignores_further_events() {
        let f = fixture();
        let record = f
            .router
            .route_order(explicit_order(VenueId::Hyperliquid))
            .await
            .unwrap();
        let cancelled = f
            .router
            .cancel_order(&record.order.client_order_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let event = OrderEvent {
            origin: EventOrigin::Venue,
            venue: VenueId::Hyperliquid,
            client_order_id: Some(record.order.client_order_id.clone()),
            venue_order_id: record.venue_order_id.clone(),
            symbol: Symbol::new("BTC-USD"),
            status: OrderStatus::Open,
            filled_quantity: Size::zero(),
            average_fill_price: None,
            error: None,
            timestamp: Utc::now(),
        };
        f.router.apply_venue_event(&event).await;
        assert_eq!(
            f.router
                .get_order(&record.order.client_order_id)
                .unwrap()
                .status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reconciliation_resolves_unknown_to_filled() {
        let f = fixture();
        f.mocks[0].push_place_outcome(PlaceOutcome::Ambiguous);
        let order = explicit_order(VenueId::Hyperliquid);
        let record = f.router.route_order(order.clone()).await.unwrap();
        assert_eq!(record.status, OrderStatus::Unknown);

        // The venue did receive the order and filled it
        f.mocks[0].set_order_status(
            order.client_order_id.clone(),
            OrderStatusReport {
                venue: VenueId::Hyperliquid,
                client_order_id: Some(order.client_order_id.clone()),
                venue_order_id: "hyperliquid-77".to_string(),
                symbol: Symbol::new("BTC-USD"),
                status: OrderStatus::Filled,
                filled_quantity: Size::from_str("0.5").unwrap(),
                average_fill_price: Some(Price::from_str("45000").unwrap()),
                timestamp: Utc::now(),
            },
        );
        f.router.reconcile_once().await;

        let resolved = f.router.get_order(&order.client_order_id).unwrap();
        assert_eq!(resolved.status, OrderStatus::Filled);
        assert_eq!(resolved.venue_order_id, Some("hyperliquid-77".to_string()));
        // Never resubmitted
        assert_eq!(f.mocks[0].place_calls(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_fails_order_venue_never_saw() {
        let f = fixture();
        f.mocks[0].push_place_outcome(PlaceOutcome::Ambiguous);
        let order = explicit_order(VenueId::Hyperliquid);
        f.router.route_order(order.clone()).await.unwrap();

        // fetch_order answers None: the venue never saw the order
        f.router.reconcile_once().await;
        let resolved = f.router.get_order(&order.client_order_id).unwrap();
        assert_eq!(resolved.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_eligible_venue_for_auto_order() {
        let f = fixture();
        for venue in VenueId::ALL {
            let breaker = f.registry.handle(venue).unwrap().breaker();
            for _ in 0..5 {
                breaker.record_failure();
            }
        }
        let order = UnifiedOrder::market("BTC-USD", OrderSide::Buy, Size::from_str("1").unwrap());
        let err = f.router.route_order(order).await.unwrap_err();
        assert_eq!(err, RouteError::NoEligibleVenue);
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(may_transition(Pending, Submitted));
        assert!(may_transition(Submitted, Open));
        assert!(may_transition(Open, Unknown));
        assert!(may_transition(Unknown, Filled));
        assert!(may_transition(PartiallyFilled, Filled));
        assert!(!may_transition(Filled, Open));
        assert!(!may_transition(Cancelled, Filled));
        assert!(!may_transition(Open, Submitted));
        assert!(!may_transition(Pending, Open));
    }
}
