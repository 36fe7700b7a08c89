use crate::core::events::VenueId;
use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting one probe
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Reconnect backoff schedule for a venue's live feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt; doubles per attempt
    pub initial_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Attempts per outage before the supervisor gives up until the
    /// next explicit connect
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Per-venue endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub venue: VenueId,
    pub rest_url: String,
    pub ws_url: String,
}

impl VenueConfig {
    /// Production endpoints for a venue
    pub fn for_venue(venue: VenueId) -> Self {
        let (rest_url, ws_url) = match venue {
            VenueId::Hyperliquid => (
                "https://api.hyperliquid.xyz",
                "wss://api.hyperliquid.xyz/ws",
            ),
            VenueId::Lighter => ("https://api.lighter.xyz", "wss://api.lighter.xyz/ws"),
            VenueId::Tradexyz => ("https://api.trade.xyz", "wss://api.trade.xyz/ws"),
        };
        Self {
            venue,
            rest_url: rest_url.to_string(),
            ws_url: ws_url.to_string(),
        }
    }
}

/// All tunables for the coordination core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Symbol universe accepted by order validation and subscriptions
    pub symbols: Vec<Symbol>,
    pub breaker: BreakerConfig,
    pub reconnect: ReconnectConfig,
    /// Maximum quote age before a venue is excluded from aggregation
    pub staleness_window: Duration,
    /// How often the aggregation engine sweeps for aged-out quotes
    pub sweep_interval: Duration,
    /// Bound on order submission; exceeding it is an ambiguous outcome
    pub submit_timeout: Duration,
    /// Bound on non-mutating venue calls (snapshots, status queries)
    pub request_timeout: Duration,
    /// Cadence of the reconciliation pass over Unknown-state orders
    pub reconcile_interval: Duration,
    /// Cadence of portfolio snapshot refreshes
    pub snapshot_interval: Duration,
    /// Per-subscription bus queue capacity; overflow drops oldest
    pub bus_queue_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            symbols: vec![Symbol::new("BTC-USD"), Symbol::new("ETH-USD")],
            breaker: BreakerConfig::default(),
            reconnect: ReconnectConfig::default(),
            staleness_window: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(30),
            bus_queue_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert!(config.staleness_window > Duration::ZERO);
        assert!(config.bus_queue_capacity > 0);
    }

    #[test]
    fn test_venue_endpoints() {
        let cfg = VenueConfig::for_venue(VenueId::Hyperliquid);
        assert!(cfg.rest_url.starts_with("https://"));
        assert!(cfg.ws_url.starts_with("wss://"));
    }
}
