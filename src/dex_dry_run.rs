//! Offline end-to-end exercise of the venue coordination core using
//! scripted in-process venues. No network access required.

use dex_aggregator::venues::mock::PlaceOutcome;
use dex_aggregator::{
    AggregationEngine, CoreConfig, EventBus, MockVenueConnector, OrderRouter, OrderSide,
    PortfolioAggregator, Position, Price, Size, Symbol, UnifiedOrder, VenueConnector, VenueId,
    VenueRegistry,
};
use log::info;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn setup_logging() {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Utc::now().format("%H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()
        .expect("logger init");
}

fn price(s: &str) -> Price {
    Price::from_str(s).expect("price literal")
}

#[tokio::main]
async fn main() {
    setup_logging();
    info!("dex_aggregator dry run starting");

    let config = CoreConfig {
        submit_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
        sweep_interval: Duration::from_millis(100),
        reconcile_interval: Duration::from_millis(200),
        snapshot_interval: Duration::from_secs(2),
        ..CoreConfig::default()
    };
    let bus = EventBus::new(config.bus_queue_capacity);

    let mocks: Vec<Arc<MockVenueConnector>> = VenueId::ALL
        .iter()
        .map(|&venue| Arc::new(MockVenueConnector::new(venue, bus.clone())))
        .collect();
    let connectors: Vec<Arc<dyn VenueConnector>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn VenueConnector>)
        .collect();

    let registry = Arc::new(VenueRegistry::new(bus.clone(), config.clone(), connectors));
    registry.connect_all().await;

    let engine = Arc::new(AggregationEngine::new(
        registry.clone(),
        bus.clone(),
        &config,
    ));
    let portfolio = Arc::new(PortfolioAggregator::new(
        registry.clone(),
        bus.clone(),
        &config,
    ));
    let router = Arc::new(OrderRouter::new(
        registry.clone(),
        engine.clone(),
        bus.clone(),
        config.clone(),
    ));

    let engine_task = engine.clone().spawn();
    let portfolio_task = portfolio.clone().spawn();
    let router_task = router.clone().spawn();
    let supervisors = registry.spawn_supervisors();

    // Two venues quoting BTC-USD
    mocks[0].emit_quote("BTC-USD", price("45000"), price("45010"));
    mocks[1].emit_quote("BTC-USD", price("44995"), price("45005"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let symbol = Symbol::new("BTC-USD");
    if let Some(snapshot) = engine.current(&symbol) {
        info!(
            "aggregated {}: best bid {} @ {}, best ask {} @ {} ({} sources)",
            symbol,
            snapshot.price.best_bid,
            snapshot.price.best_bid_venue,
            snapshot.price.best_ask,
            snapshot.price.best_ask_venue,
            snapshot.price.sources.len()
        );
    }

    // Explicit-venue order
    let explicit = UnifiedOrder::limit(
        "BTC-USD",
        OrderSide::Buy,
        Size::from_str("0.25").expect("size literal"),
        price("45000"),
    )
    .with_venue(VenueId::Lighter);
    match router.route_order(explicit).await {
        Ok(record) => info!(
            "explicit order {} -> {} ({:?})",
            record.order.client_order_id, record.venue, record.status
        ),
        Err(e) => info!("explicit order failed: {}", e),
    }

    // Automatically routed order lands on the best ask
    let auto = UnifiedOrder::limit(
        "BTC-USD",
        OrderSide::Buy,
        Size::from_str("0.5").expect("size literal"),
        price("45005"),
    );
    match router.route_order(auto).await {
        Ok(record) => info!(
            "auto order {} routed to {} ({:?})",
            record.order.client_order_id, record.venue, record.status
        ),
        Err(e) => info!("auto order failed: {}", e),
    }

    // Ambiguous submission parked as Unknown, then reconciled
    mocks[2].push_place_outcome(PlaceOutcome::Ambiguous);
    let ambiguous = UnifiedOrder::market(
        "BTC-USD",
        OrderSide::Sell,
        Size::from_str("0.1").expect("size literal"),
    )
    .with_venue(VenueId::Tradexyz);
    let client_order_id = ambiguous.client_order_id.clone();
    match router.route_order(ambiguous).await {
        Ok(record) => info!(
            "ambiguous order {} parked as {:?}",
            record.order.client_order_id, record.status
        ),
        Err(e) => info!("ambiguous order failed: {}", e),
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(record) = router.get_order(&client_order_id) {
        info!("after reconciliation: {:?}", record.status);
    }

    // Portfolio view from a streamed position
    mocks[0].emit_position(Position {
        venue: VenueId::Hyperliquid,
        symbol: symbol.clone(),
        size: Size::from_str("0.75").expect("size literal"),
        entry_price: price("44000"),
        mark_price: price("45000"),
        unrealized_pnl: Decimal::from_str("750").expect("pnl literal"),
        realized_pnl: Decimal::ZERO,
        updated_at: chrono::Utc::now(),
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let view = portfolio.view();
    info!(
        "portfolio: {} positions, unrealized pnl {}, venues online {}",
        view.positions.len(),
        view.total_unrealized_pnl,
        view.venues
            .iter()
            .filter(|v| v.presence == dex_aggregator::VenuePresence::Online)
            .count()
    );

    let stats = bus.stats();
    info!(
        "bus: {} prices, {} orders, {} health events published, {} dropped",
        stats.prices.published,
        stats.orders.published,
        stats.health.published,
        stats.prices.dropped + stats.orders.dropped
    );

    registry.shutdown();
    registry.disconnect_all().await;
    for task in supervisors {
        task.abort();
    }
    engine_task.abort();
    portfolio_task.abort();
    router_task.abort();
    info!("dry run complete");
}
