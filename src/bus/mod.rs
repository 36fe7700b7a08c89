//! In-process publish/subscribe substrate for all core events.
//!
//! Topics are typed by event kind. Publishing never blocks and never
//! waits on a subscriber: each subscription owns a bounded FIFO, and on
//! overflow the oldest queued event is dropped and counted. Delivery
//! order is preserved per topic in publish order, which preserves it
//! per (topic, originating venue).

use crate::core::events::{Balance, HealthEvent, OrderEvent, PortfolioView, Position, PriceEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

struct SubscriberShared<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Handle to one topic subscription. Dropping it unsubscribes; the
/// publisher prunes dead subscriptions lazily.
pub struct Subscription<T> {
    shared: Arc<SubscriberShared<T>>,
}

impl<T> Subscription<T> {
    /// Receive the next event, waiting if the queue is empty
    pub async fn recv(&mut self) -> T {
        loop {
            if let Some(event) = self.shared.queue.lock().unwrap().pop_front() {
                return event;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.queue.lock().unwrap().pop_front()
    }

    /// Events lost to overflow on this subscription
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

struct Topic<T> {
    subscribers: Mutex<Vec<Weak<SubscriberShared<T>>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

impl<T: Clone> Topic<T> {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    fn publish(&self, event: T) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|weak| match weak.upgrade() {
            Some(shared) => {
                {
                    let mut queue = shared.queue.lock().unwrap();
                    if queue.len() >= shared.capacity {
                        queue.pop_front();
                        shared.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    queue.push_back(event.clone());
                }
                shared.notify.notify_one();
                true
            }
            None => false,
        });
    }

    fn subscribe(&self) -> Subscription<T> {
        let shared = Arc::new(SubscriberShared {
            queue: Mutex::new(VecDeque::with_capacity(self.capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: self.capacity,
        });
        self.subscribers
            .lock()
            .unwrap()
            .push(Arc::downgrade(&shared));
        Subscription { shared }
    }

    fn stats(&self) -> TopicStats {
        TopicStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: self
                .subscribers
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.strong_count() > 0)
                .count(),
        }
    }
}

/// Published/dropped counters for one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    pub published: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

/// Bus-wide counters, exposed for observability
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub prices: TopicStats,
    pub orders: TopicStats,
    pub positions: TopicStats,
    pub balances: TopicStats,
    pub health: TopicStats,
    pub portfolio: TopicStats,
}

struct BusInner {
    prices: Topic<PriceEvent>,
    orders: Topic<OrderEvent>,
    positions: Topic<Position>,
    balances: Topic<Balance>,
    health: Topic<HealthEvent>,
    portfolio: Topic<PortfolioView>,
}

/// Cheaply cloneable handle to the event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                prices: Topic::new(queue_capacity),
                orders: Topic::new(queue_capacity),
                positions: Topic::new(queue_capacity),
                balances: Topic::new(queue_capacity),
                health: Topic::new(queue_capacity),
                portfolio: Topic::new(queue_capacity),
            }),
        }
    }

    pub fn publish_price(&self, event: PriceEvent) {
        self.inner.prices.publish(event);
    }

    pub fn publish_order(&self, event: OrderEvent) {
        self.inner.orders.publish(event);
    }

    pub fn publish_position(&self, event: Position) {
        self.inner.positions.publish(event);
    }

    pub fn publish_balance(&self, event: Balance) {
        self.inner.balances.publish(event);
    }

    pub fn publish_health(&self, event: HealthEvent) {
        self.inner.health.publish(event);
    }

    pub fn publish_portfolio(&self, view: PortfolioView) {
        self.inner.portfolio.publish(view);
    }

    pub fn subscribe_prices(&self) -> Subscription<PriceEvent> {
        self.inner.prices.subscribe()
    }

    pub fn subscribe_orders(&self) -> Subscription<OrderEvent> {
        self.inner.orders.subscribe()
    }

    pub fn subscribe_positions(&self) -> Subscription<Position> {
        self.inner.positions.subscribe()
    }

    pub fn subscribe_balances(&self) -> Subscription<Balance> {
        self.inner.balances.subscribe()
    }

    pub fn subscribe_health(&self) -> Subscription<HealthEvent> {
        self.inner.health.subscribe()
    }

    pub fn subscribe_portfolio(&self) -> Subscription<PortfolioView> {
        self.inner.portfolio.subscribe()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            prices: self.inner.prices.stats(),
            orders: self.inner.orders.stats(),
            positions: self.inner.positions.stats(),
            balances: self.inner.balances.stats(),
            health: self.inner.health.stats(),
            portfolio: self.inner.portfolio.stats(),
        }
    }
}
