//! Cross-venue price aggregation.
//!
//! Keeps the latest normalized quote per (symbol, venue), excludes
//! venues whose breaker is open or whose quote aged past the staleness
//! window, and recomputes the best bid/ask whenever an input changes.
//! Recomputation is serialized per symbol; symbols proceed in parallel.

use crate::bus::EventBus;
use crate::core::config::CoreConfig;
use crate::core::events::{
    AggregatedPrice, CircuitState, HealthEvent, HealthKind, PriceEvent, PriceSource, QuoteUpdate,
};
use crate::types::Symbol;
use crate::venues::registry::VenueRegistry;
use chrono::Utc;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Best bid/ask across a set of per-venue quotes. Comparisons are on
/// the exact decimal values. Returns None when the set is empty.
pub fn aggregate(symbol: &Symbol, quotes: &[QuoteUpdate]) -> Option<AggregatedPrice> {
    let best_bid = quotes.iter().max_by(|a, b| {
        a.bid
            .cmp(&b.bid)
            // Equal bids resolve to the lower venue id for determinism
            .then_with(|| b.venue.cmp(&a.venue))
    })?;
    let best_ask = quotes.iter().min_by(|a, b| {
        a.ask
            .cmp(&b.ask)
            .then_with(|| a.venue.cmp(&b.venue))
    })?;
    let mut sources: SmallVec<[PriceSource; 4]> = quotes
        .iter()
        .map(|q| PriceSource {
            venue: q.venue,
            bid: q.bid,
            ask: q.ask,
            timestamp: q.timestamp,
        })
        .collect();
    sources.sort_by_key(|s| s.venue);
    Some(AggregatedPrice {
        symbol: symbol.clone(),
        best_bid: best_bid.bid,
        best_bid_venue: best_bid.venue,
        best_ask: best_ask.ask,
        best_ask_venue: best_ask.venue,
        sources,
        computed_at: Utc::now(),
    })
}

/// Aggregated price served to readers, explicitly tagged when it is a
/// last-known value no longer backed by any eligible venue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub price: AggregatedPrice,
    pub stale: bool,
}

struct SymbolBook {
    quotes: HashMap<crate::core::events::VenueId, QuoteUpdate>,
    last_published: Option<AggregatedPrice>,
    /// Last publication for this symbol was NoLiquidity
    no_liquidity: bool,
}

impl SymbolBook {
    fn new() -> Self {
        Self {
            quotes: HashMap::new(),
            last_published: None,
            no_liquidity: false,
        }
    }
}

/// The price aggregation engine. Owns the per-symbol quote tables;
/// other components read through [`AggregationEngine::current`] or the
/// price topic, never through shared references to the tables.
pub struct AggregationEngine {
    registry: Arc<VenueRegistry>,
    bus: EventBus,
    staleness_window: Duration,
    sweep_interval: Duration,
    books: DashMap<Symbol, Mutex<SymbolBook>>,
}

impl AggregationEngine {
    pub fn new(registry: Arc<VenueRegistry>, bus: EventBus, config: &CoreConfig) -> Self {
        Self {
            registry,
            bus,
            staleness_window: config.staleness_window,
            sweep_interval: config.sweep_interval,
            books: DashMap::new(),
        }
    }

    /// Latest computed price for a symbol. `stale` is true when no
    /// venue is currently eligible and the value is last-known only.
    pub fn current(&self, symbol: &Symbol) -> Option<PriceSnapshot> {
        let book = self.books.get(symbol)?;
        let book = book.lock().unwrap();
        let price = book.last_published.clone()?;
        Some(PriceSnapshot {
            stale: book.no_liquidity,
            price,
        })
    }

    /// Ingest one normalized venue quote and republish the aggregate
    pub fn apply_quote(&self, quote: QuoteUpdate) {
        let symbol = quote.symbol.clone();
        let book = self
            .books
            .entry(symbol.clone())
            .or_insert_with(|| Mutex::new(SymbolBook::new()));
        let mut book = book.lock().unwrap();
        // Per-venue timestamps are monotonic; drop regressions
        if let Some(existing) = book.quotes.get(&quote.venue) {
            if quote.timestamp < existing.timestamp {
                debug!(venue = %quote.venue, symbol = %symbol, "stale quote regression dropped");
                return;
            }
        }
        book.quotes.insert(quote.venue, quote);
        self.recompute_locked(&symbol, &mut book, true);
    }

    /// React to a health transition: an opened breaker excludes the
    /// venue from every symbol immediately; recovery re-includes it on
    /// the venue's next fresh quote.
    pub fn handle_health(&self, event: &HealthEvent) {
        if let HealthKind::Circuit(state) = &event.kind {
            if *state == CircuitState::Open {
                info!(venue = %event.venue, "excluding venue from aggregation");
            }
            self.sweep();
        }
    }

    /// Re-evaluate every symbol, expiring quotes that aged out without
    /// a superseding update
    pub fn sweep(&self) {
        for entry in self.books.iter() {
            let symbol = entry.key().clone();
            let mut book = entry.value().lock().unwrap();
            self.recompute_locked(&symbol, &mut book, false);
        }
    }

    fn eligible(&self, book: &SymbolBook) -> Vec<QuoteUpdate> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.staleness_window)
            .unwrap_or(chrono::Duration::MAX);
        book.quotes
            .values()
            .filter(|q| now.signed_duration_since(q.timestamp) <= max_age)
            .filter(|q| self.registry.circuit_state(q.venue) != Some(CircuitState::Open))
            .cloned()
            .collect()
    }

    /// Recompute under the symbol's lock. `input_changed` forces a
    /// publication; otherwise only output changes are published.
    fn recompute_locked(&self, symbol: &Symbol, book: &mut SymbolBook, input_changed: bool) {
        let eligible = self.eligible(book);
        match aggregate(symbol, &eligible) {
            Some(price) => {
                let output_changed = book
                    .last_published
                    .as_ref()
                    .map(|last| !same_output(last, &price))
                    .unwrap_or(true);
                if input_changed || output_changed || book.no_liquidity {
                    book.no_liquidity = false;
                    book.last_published = Some(price.clone());
                    self.bus.publish_price(PriceEvent::Aggregated(price));
                }
            }
            None => {
                if !book.no_liquidity {
                    book.no_liquidity = true;
                    self.bus.publish_price(PriceEvent::NoLiquidity {
                        symbol: symbol.clone(),
                        last: book.last_published.clone(),
                    });
                }
            }
        }
    }

    /// Run the engine: consume venue quotes and health transitions,
    /// sweeping for aged-out quotes on a fixed cadence
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut prices = self.bus.subscribe_prices();
        let mut health = self.bus.subscribe_health();
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = prices.recv() => {
                        if let PriceEvent::Quote(quote) = event {
                            self.apply_quote(quote);
                        }
                    }
                    event = health.recv() => self.handle_health(&event),
                    _ = sweep.tick() => self.sweep(),
                }
            }
        })
    }
}

fn same_output(a: &AggregatedPrice, b: &AggregatedPrice) -> bool {
    a.best_bid == b.best_bid
        && a.best_bid_venue == b.best_bid_venue
        && a.best_ask == b.best_ask
        && a.best_ask_venue == b.best_ask_venue
        && a.sources.len() == b.sources.len()
        && a.sources
            .iter()
            .zip(b.sources.iter())
            .all(|(x, y)| x.venue == y.venue)
}
