use crate::bus::EventBus;
use crate::core::config::CoreConfig;
use crate::core::error::VenueError;
use crate::core::events::{
    Balance, CancelAck, CircuitState, ConnectionStatus, HealthEvent, OrderAck, OrderStatusReport,
    Position, UnifiedOrder, VenueHealth, VenueId,
};
use crate::types::Symbol;
use crate::venues::breaker::CircuitBreaker;
use crate::venues::connector::VenueConnector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One venue's connector bundled with its circuit breaker and
/// connection bookkeeping
pub struct VenueHandle {
    venue: VenueId,
    connector: Arc<dyn VenueConnector>,
    breaker: CircuitBreaker,
    reconnect_failures: AtomicU32,
    last_circuit: Mutex<CircuitState>,
}

impl VenueHandle {
    fn new(connector: Arc<dyn VenueConnector>, config: &CoreConfig) -> Self {
        Self {
            venue: connector.venue(),
            connector,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            reconnect_failures: AtomicU32::new(0),
            last_circuit: Mutex::new(CircuitState::Closed),
        }
    }

    pub fn venue(&self) -> VenueId {
        self.venue
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn reconnect_failures(&self) -> u32 {
        self.reconnect_failures.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> VenueHealth {
        VenueHealth {
            venue: self.venue,
            connection: if self.connector.is_connected() {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            },
            circuit: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            reconnect_failures: self.reconnect_failures(),
            last_transition: self.breaker.last_transition(),
        }
    }

    /// Record a completed call on the breaker and publish a health
    /// event if the circuit state changed. Business-level answers
    /// (`Rejected`, `OrderNotFound`) are successful round trips.
    fn settle<T>(&self, bus: &EventBus, result: &Result<T, VenueError>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_venue_failure() => self.breaker.record_failure(),
            Err(_) => self.breaker.record_success(),
        }
        let state = self.breaker.state();
        let mut last = self.last_circuit.lock().unwrap();
        if *last != state {
            *last = state;
            bus.publish_health(HealthEvent::circuit(self.venue, state));
        }
    }
}

/// Fixed map of venue connectors, breaker-gated call surface, and
/// per-venue reconnect supervision. The venue set never changes after
/// construction.
pub struct VenueRegistry {
    venues: HashMap<VenueId, Arc<VenueHandle>>,
    bus: EventBus,
    config: CoreConfig,
    shutdown: AtomicBool,
}

impl VenueRegistry {
    pub fn new(bus: EventBus, config: CoreConfig, connectors: Vec<Arc<dyn VenueConnector>>) -> Self {
        let venues = connectors
            .into_iter()
            .map(|connector| {
                let handle = VenueHandle::new(connector, &config);
                (handle.venue(), Arc::new(handle))
            })
            .collect();
        Self {
            venues,
            bus,
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Supported venues in identity order
    pub fn venue_ids(&self) -> Vec<VenueId> {
        let mut ids: Vec<VenueId> = self.venues.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, venue: VenueId) -> bool {
        self.venues.contains_key(&venue)
    }

    pub fn handle(&self, venue: VenueId) -> Option<&Arc<VenueHandle>> {
        self.venues.get(&venue)
    }

    pub fn health(&self, venue: VenueId) -> Option<VenueHealth> {
        self.venues.get(&venue).map(|h| h.health())
    }

    pub fn all_health(&self) -> Vec<VenueHealth> {
        self.venue_ids()
            .into_iter()
            .filter_map(|v| self.health(v))
            .collect()
    }

    pub fn circuit_state(&self, venue: VenueId) -> Option<CircuitState> {
        self.venues.get(&venue).map(|h| h.breaker.state())
    }

    /// Whether the venue may currently be offered work
    pub fn is_eligible(&self, venue: VenueId) -> bool {
        self.venues
            .get(&venue)
            .map(|h| h.breaker.is_eligible())
            .unwrap_or(false)
    }

    fn checked(&self, venue: VenueId) -> Result<Arc<VenueHandle>, VenueError> {
        self.venues
            .get(&venue)
            .cloned()
            .ok_or(VenueError::Unavailable { venue })
    }

    /// Submit an order through the venue's breaker under the submit
    /// timeout. The underlying call runs on its own task, so caller
    /// cancellation never cancels a submission that may already have
    /// reached the venue; the breaker is settled either way.
    pub async fn place_order(
        &self,
        venue: VenueId,
        order: &UnifiedOrder,
    ) -> Result<OrderAck, VenueError> {
        let handle = self.checked(venue)?;
        if !handle.breaker.try_acquire() {
            return Err(VenueError::Unavailable { venue });
        }
        let bus = self.bus.clone();
        let order = order.clone();
        let timeout = self.config.submit_timeout;
        let task: JoinHandle<Result<OrderAck, VenueError>> = tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, handle.connector.place_order(&order)).await {
                    Ok(result) => result,
                    Err(_) => Err(VenueError::Ambiguous {
                        venue,
                        reason: format!("submission exceeded {:?}", timeout),
                    }),
                };
            handle.settle(&bus, &result);
            result
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(VenueError::Ambiguous {
                venue,
                reason: format!("submission task aborted: {}", e),
            }),
        }
    }

    /// Cancel an order through the venue's breaker. Runs detached for
    /// the same reason as `place_order`.
    pub async fn cancel_order(
        &self,
        venue: VenueId,
        venue_order_id: &str,
    ) -> Result<CancelAck, VenueError> {
        let handle = self.checked(venue)?;
        if !handle.breaker.try_acquire() {
            return Err(VenueError::Unavailable { venue });
        }
        let bus = self.bus.clone();
        let venue_order_id = venue_order_id.to_string();
        let timeout = self.config.submit_timeout;
        let task: JoinHandle<Result<CancelAck, VenueError>> = tokio::spawn(async move {
            let result = match tokio::time::timeout(
                timeout,
                handle.connector.cancel_order(&venue_order_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(VenueError::Ambiguous {
                    venue,
                    reason: format!("cancel exceeded {:?}", timeout),
                }),
            };
            handle.settle(&bus, &result);
            result
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(VenueError::Ambiguous {
                venue,
                reason: format!("cancel task aborted: {}", e),
            }),
        }
    }

    /// Order status query, used by reconciliation
    pub async fn fetch_order(
        &self,
        venue: VenueId,
        client_order_id: &str,
    ) -> Result<Option<OrderStatusReport>, VenueError> {
        let handle = self.checked(venue)?;
        if !handle.breaker.try_acquire() {
            return Err(VenueError::Unavailable { venue });
        }
        let result = match tokio::time::timeout(
            self.config.request_timeout,
            handle.connector.fetch_order(client_order_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(VenueError::Protocol {
                venue,
                reason: "status query timed out".to_string(),
            }),
        };
        handle.settle(&self.bus, &result);
        result
    }

    pub async fn fetch_positions(&self, venue: VenueId) -> Result<Vec<Position>, VenueError> {
        let handle = self.checked(venue)?;
        if !handle.breaker.try_acquire() {
            return Err(VenueError::Unavailable { venue });
        }
        let result = match tokio::time::timeout(
            self.config.request_timeout,
            handle.connector.fetch_positions(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(VenueError::Protocol {
                venue,
                reason: "position snapshot timed out".to_string(),
            }),
        };
        handle.settle(&self.bus, &result);
        result
    }

    pub async fn fetch_balances(&self, venue: VenueId) -> Result<Vec<Balance>, VenueError> {
        let handle = self.checked(venue)?;
        if !handle.breaker.try_acquire() {
            return Err(VenueError::Unavailable { venue });
        }
        let result = match tokio::time::timeout(
            self.config.request_timeout,
            handle.connector.fetch_balances(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(VenueError::Protocol {
                venue,
                reason: "balance snapshot timed out".to_string(),
            }),
        };
        handle.settle(&self.bus, &result);
        result
    }

    /// Connect every venue and replay the configured subscription set.
    /// A venue that fails to come up degrades that venue only.
    pub async fn connect_all(&self) {
        for venue in self.venue_ids() {
            if let Err(e) = self.connect_venue(venue).await {
                warn!(venue = %venue, error = %e, "initial connect failed");
            }
        }
    }

    async fn connect_venue(&self, venue: VenueId) -> Result<(), VenueError> {
        let handle = self.checked(venue)?;
        let result = match tokio::time::timeout(
            self.config.request_timeout,
            handle.connector.connect(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(VenueError::Unreachable {
                venue,
                reason: "connect handshake timed out".to_string(),
            }),
        };
        handle.settle(&self.bus, &result);
        match result {
            Ok(()) => {
                handle.reconnect_failures.store(0, Ordering::Relaxed);
                info!(venue = %venue, "venue connected");
                let symbols: Vec<Symbol> = self.config.symbols.clone();
                if let Err(e) = handle.connector.subscribe(&symbols).await {
                    warn!(venue = %venue, error = %e, "subscription replay failed");
                }
                Ok(())
            }
            Err(e) => {
                handle.reconnect_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn disconnect_all(&self) {
        for venue in self.venue_ids() {
            if let Some(handle) = self.venues.get(&venue) {
                if let Err(e) = handle.connector.disconnect().await {
                    warn!(venue = %venue, error = %e, "disconnect failed");
                }
            }
        }
    }

    /// Stop the supervision tasks at their next check
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Spawn one supervision task per venue: watches the connection
    /// and reconnects with exponential backoff, reporting health
    /// transitions through the connector rather than looping silently.
    pub fn spawn_supervisors(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.venue_ids()
            .into_iter()
            .map(|venue| {
                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    registry.supervise(venue).await;
                })
            })
            .collect()
    }

    async fn supervise(&self, venue: VenueId) {
        let check_interval = self.config.reconnect.initial_delay;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(venue = %venue, "supervisor stopping");
                return;
            }
            let connected = self
                .venues
                .get(&venue)
                .map(|h| h.connector.is_connected())
                .unwrap_or(false);
            if !connected {
                self.reconnect_with_backoff(venue).await;
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    async fn reconnect_with_backoff(&self, venue: VenueId) {
        let reconnect = self.config.reconnect.clone();
        let mut delay = reconnect.initial_delay;
        for attempt in 1..=reconnect.max_attempts {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match self.connect_venue(venue).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        venue = %venue,
                        attempt,
                        max = reconnect.max_attempts,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(reconnect.max_delay);
        }
        error!(venue = %venue, "reconnect attempts exhausted; waiting for next supervision pass");
    }
}
