//! Consolidated portfolio across all venues.
//!
//! Maintains one current position per (venue, symbol) and one current
//! balance per (venue, asset), fed by venue events and corrected by
//! periodic snapshot fetches. On a conflict between an event-derived
//! value and a snapshot, the later timestamp wins.

use crate::bus::EventBus;
use crate::core::config::CoreConfig;
use crate::core::events::{
    Balance, CircuitState, OrderEvent, PortfolioView, Position, VenueBreakdown, VenueId,
    VenuePresence,
};
use crate::types::Symbol;
use crate::venues::registry::VenueRegistry;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The portfolio aggregator. Owns the position/balance tables; other
/// components read through [`PortfolioAggregator::view`] or the
/// portfolio topic.
pub struct PortfolioAggregator {
    registry: Arc<VenueRegistry>,
    bus: EventBus,
    snapshot_interval: Duration,
    positions: DashMap<(VenueId, Symbol), Position>,
    balances: DashMap<(VenueId, String), Balance>,
    active_orders: DashMap<String, crate::core::events::OrderStatus>,
}

impl PortfolioAggregator {
    pub fn new(registry: Arc<VenueRegistry>, bus: EventBus, config: &CoreConfig) -> Self {
        Self {
            registry,
            bus,
            snapshot_interval: config.snapshot_interval,
            positions: DashMap::new(),
            balances: DashMap::new(),
            active_orders: DashMap::new(),
        }
    }

    /// Apply a position update. Older-than-current updates are
    /// discarded; a zero-size update deletes the row.
    pub fn apply_position(&self, position: Position) -> bool {
        let key = (position.venue, position.symbol.clone());
        if let Some(existing) = self.positions.get(&key) {
            if existing.updated_at > position.updated_at {
                debug!(venue = %position.venue, symbol = %position.symbol, "stale position update discarded");
                return false;
            }
        }
        if position.size.is_zero() {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, position);
        }
        self.publish_view();
        true
    }

    /// Apply a balance update with the same conflict rule as positions
    pub fn apply_balance(&self, balance: Balance) -> bool {
        let key = (balance.venue, balance.asset.clone());
        if let Some(existing) = self.balances.get(&key) {
            if existing.updated_at > balance.updated_at {
                return false;
            }
        }
        self.balances.insert(key, balance);
        self.publish_view();
        true
    }

    /// Track the active-order count from order events
    pub fn apply_order(&self, event: &OrderEvent) {
        let key = match &event.client_order_id {
            Some(id) => id.clone(),
            None => match &event.venue_order_id {
                Some(id) => id.clone(),
                None => return,
            },
        };
        if event.status.is_terminal() {
            self.active_orders.remove(&key);
        } else {
            self.active_orders.insert(key, event.status);
        }
        self.publish_view();
    }

    /// All current venue-tagged positions
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.iter().map(|e| e.value().clone()).collect();
        positions.sort_by(|a, b| (a.venue, &a.symbol).cmp(&(b.venue, &b.symbol)));
        positions
    }

    /// All current venue-tagged balances
    pub fn balances(&self) -> Vec<Balance> {
        let mut balances: Vec<Balance> = self.balances.iter().map(|e| e.value().clone()).collect();
        balances.sort_by(|a, b| (a.venue, &a.asset).cmp(&(b.venue, &b.asset)));
        balances
    }

    /// Recompute the consolidated view
    pub fn view(&self) -> PortfolioView {
        let positions = self.positions();
        let balances = self.balances();

        let mut venues = Vec::new();
        for venue in self.registry.venue_ids() {
            let venue_positions: Vec<&Position> =
                positions.iter().filter(|p| p.venue == venue).collect();
            let balance_count = balances.iter().filter(|b| b.venue == venue).count();
            let presence = if venue_positions.is_empty() && balance_count == 0 {
                VenuePresence::Offline
            } else {
                VenuePresence::Online
            };
            venues.push(VenueBreakdown {
                venue,
                presence,
                unrealized_pnl: venue_positions.iter().map(|p| p.unrealized_pnl).sum(),
                realized_pnl: venue_positions.iter().map(|p| p.realized_pnl).sum(),
                position_count: venue_positions.len(),
                balance_count,
            });
        }

        PortfolioView {
            total_unrealized_pnl: positions.iter().map(|p| p.unrealized_pnl).sum(),
            total_realized_pnl: positions.iter().map(|p| p.realized_pnl).sum(),
            total_notional: positions.iter().map(|p| p.notional()).sum::<Decimal>(),
            positions,
            balances,
            venues,
            active_orders: self.active_orders.len(),
            updated_at: Utc::now(),
        }
    }

    fn publish_view(&self) {
        self.bus.publish_portfolio(self.view());
    }

    /// Pull point-in-time snapshots from every venue whose breaker is
    /// not open, correcting drift from missed events. Rows absent from
    /// a venue's snapshot and older than the fetch are removed.
    pub async fn refresh_snapshots(&self) {
        for venue in self.registry.venue_ids() {
            if self.registry.circuit_state(venue) == Some(CircuitState::Open) {
                continue;
            }
            let fetch_started = Utc::now();
            match self.registry.fetch_positions(venue).await {
                Ok(snapshot) => {
                    let mut seen: Vec<Symbol> = Vec::with_capacity(snapshot.len());
                    for position in snapshot {
                        seen.push(position.symbol.clone());
                        self.apply_position(position);
                    }
                    let gone: Vec<(VenueId, Symbol)> = self
                        .positions
                        .iter()
                        .filter(|e| {
                            let (row_venue, symbol) = e.key();
                            *row_venue == venue
                                && !seen.contains(symbol)
                                && e.value().updated_at < fetch_started
                        })
                        .map(|e| e.key().clone())
                        .collect();
                    for key in gone {
                        self.positions.remove(&key);
                    }
                }
                Err(e) => warn!(venue = %venue, error = %e, "position snapshot failed"),
            }
            match self.registry.fetch_balances(venue).await {
                Ok(snapshot) => {
                    for balance in snapshot {
                        self.apply_balance(balance);
                    }
                }
                Err(e) => warn!(venue = %venue, error = %e, "balance snapshot failed"),
            }
        }
        self.publish_view();
    }

    /// Run the aggregator: consume position/balance/order events and
    /// refresh snapshots on a fixed cadence
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut positions = self.bus.subscribe_positions();
        let mut balances = self.bus.subscribe_balances();
        let mut orders = self.bus.subscribe_orders();
        let mut refresh = tokio::time::interval(self.snapshot_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    position = positions.recv() => {
                        self.apply_position(position);
                    }
                    balance = balances.recv() => {
                        self.apply_balance(balance);
                    }
                    order = orders.recv() => {
                        self.apply_order(&order);
                    }
                    _ = refresh.tick() => {
                        self.refresh_snapshots().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{EventOrigin, OrderStatus};
    use crate::types::{Price, Size};
    use crate::venues::connector::VenueConnector;
    use crate::venues::mock::MockVenueConnector;
    use std::str::FromStr;

    fn position(venue: VenueId, symbol: &str, size: &str, unrealized: i64) -> Position {
        Position {
            venue,
            symbol: Symbol::new(symbol),
            size: Size::from_str(size).unwrap(),
            entry_price: Price::from_str("44000").unwrap(),
            mark_price: Price::from_str("45000").unwrap(),
            unrealized_pnl: Decimal::new(unrealized, 0),
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    fn setup() -> (EventBus, Vec<Arc<MockVenueConnector>>, PortfolioAggregator) {
        let bus = EventBus::new(64);
        let config = CoreConfig::default();
        let mocks: Vec<Arc<MockVenueConnector>> = VenueId::ALL
            .iter()
            .map(|&v| Arc::new(MockVenueConnector::new(v, bus.clone())))
            .collect();
        let connectors: Vec<Arc<dyn VenueConnector>> = mocks
            .iter()
            .map(|m| m.clone() as Arc<dyn VenueConnector>)
            .collect();
        let registry = Arc::new(VenueRegistry::new(bus.clone(), config.clone(), connectors));
        let aggregator = PortfolioAggregator::new(registry, bus.clone(), &config);
        (bus, mocks, aggregator)
    }

    #[tokio::test]
    async fn test_position_superseded_in_place() {
        let (_bus, _mocks, aggregator) = setup();
        aggregator.apply_position(position(VenueId::Hyperliquid, "BTC-USD", "1", 100));
        aggregator.apply_position(position(VenueId::Hyperliquid, "BTC-USD", "2", 200));

        let positions = aggregator.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, Size::from_str("2").unwrap());
    }

    #[tokio::test]
    async fn test_out_of_order_update_discarded() {
        let (_bus, _mocks, aggregator) = setup();
        let newer = position(VenueId::Hyperliquid, "BTC-USD", "2", 200);
        let mut older = position(VenueId::Hyperliquid, "BTC-USD", "1", 100);
        older.updated_at = newer.updated_at - chrono::Duration::seconds(5);

        assert!(aggregator.apply_position(newer));
        assert!(!aggregator.apply_position(older));
        assert_eq!(
            aggregator.positions()[0].size,
            Size::from_str("2").unwrap()
        );
    }

    #[tokio::test]
    async fn test_zero_size_removes_position() {
        let (_bus, _mocks, aggregator) = setup();
        aggregator.apply_position(position(VenueId::Lighter, "ETH-USD", "3", 0));
        aggregator.apply_position(position(VenueId::Lighter, "ETH-USD", "0", 0));
        assert!(aggregator.positions().is_empty());
    }

    #[tokio::test]
    async fn test_view_totals_and_offline_flag() {
        let (_bus, _mocks, aggregator) = setup();
        aggregator.apply_position(position(VenueId::Hyperliquid, "BTC-USD", "1", 150));
        aggregator.apply_position(position(VenueId::Lighter, "BTC-USD", "-1", -50));

        let view = aggregator.view();
        assert_eq!(view.total_unrealized_pnl, Decimal::new(100, 0));
        assert_eq!(view.positions.len(), 2);
        assert_eq!(view.venues.len(), 3);

        let tradexyz = view
            .venues
            .iter()
            .find(|v| v.venue == VenueId::Tradexyz)
            .unwrap();
        assert_eq!(tradexyz.presence, VenuePresence::Offline);
        let hyperliquid = view
            .venues
            .iter()
            .find(|v| v.venue == VenueId::Hyperliquid)
            .unwrap();
        assert_eq!(hyperliquid.presence, VenuePresence::Online);
        assert_eq!(hyperliquid.unrealized_pnl, Decimal::new(150, 0));
    }

    #[tokio::test]
    async fn test_active_order_tracking() {
        let (_bus, _mocks, aggregator) = setup();
        let mut event = OrderEvent {
            origin: EventOrigin::Router,
            venue: VenueId::Hyperliquid,
            client_order_id: Some("c-1".to_string()),
            venue_order_id: None,
            symbol: Symbol::new("BTC-USD"),
            status: OrderStatus::Open,
            filled_quantity: Size::zero(),
            average_fill_price: None,
            error: None,
            timestamp: Utc::now(),
        };
        aggregator.apply_order(&event);
        assert_eq!(aggregator.view().active_orders, 1);

        event.status = OrderStatus::Filled;
        aggregator.apply_order(&event);
        assert_eq!(aggregator.view().active_orders, 0);
    }

    #[tokio::test]
    async fn test_snapshot_refresh_corrects_drift() {
        let (_bus, mocks, aggregator) = setup();
        // Event-derived row that the venue no longer reports
        let mut gone = position(VenueId::Hyperliquid, "ETH-USD", "5", 0);
        gone.updated_at = Utc::now() - chrono::Duration::seconds(60);
        aggregator.apply_position(gone);

        mocks[0].set_positions(vec![position(VenueId::Hyperliquid, "BTC-USD", "1", 10)]);
        aggregator.refresh_snapshots().await;

        let positions = aggregator.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, Symbol::new("BTC-USD"));
    }

    #[tokio::test]
    async fn test_snapshot_vs_event_later_timestamp_wins() {
        let (_bus, mocks, aggregator) = setup();
        // Live event newer than anything the snapshot will report
        let newer = position(VenueId::Hyperliquid, "BTC-USD", "7", 70);
        let mut snapshot_row = position(VenueId::Hyperliquid, "BTC-USD", "1", 10);
        snapshot_row.updated_at = newer.updated_at - chrono::Duration::seconds(30);

        aggregator.apply_position(newer);
        mocks[0].set_positions(vec![snapshot_row]);
        aggregator.refresh_snapshots().await;

        assert_eq!(
            aggregator.positions()[0].size,
            Size::from_str("7").unwrap()
        );
    }

    #[tokio::test]
    async fn test_view_published_on_contributing_update() {
        let (bus, _mocks, aggregator) = setup();
        let mut views = bus.subscribe_portfolio();
        aggregator.apply_position(position(VenueId::Lighter, "BTC-USD", "1", 5));
        let view = views.recv().await;
        assert_eq!(view.positions.len(), 1);
    }
}
