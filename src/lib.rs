pub mod aggregation;
pub mod bus;
pub mod core;
pub mod portfolio;
pub mod router;
pub mod types;
pub mod venues;

pub use types::{Price, Size, Symbol};

pub use crate::core::config::{BreakerConfig, CoreConfig, ReconnectConfig, VenueConfig};
pub use crate::core::error::{RouteError, VenueError};
pub use crate::core::events::{
    AggregatedPrice, Balance, CancelAck, CircuitState, ConnectionStatus, EventOrigin, HealthEvent,
    HealthKind, OrderAck, OrderEvent, OrderRecord, OrderSide, OrderStatus, OrderStatusReport,
    OrderType, PortfolioView, Position, PriceEvent, PriceSource, QuoteUpdate, TimeInForce,
    UnifiedOrder, VenueBreakdown, VenueHealth, VenueId, VenuePresence,
};

pub use aggregation::{AggregationEngine, PriceSnapshot};
pub use bus::{BusStats, EventBus, Subscription, TopicStats};
pub use portfolio::PortfolioAggregator;
pub use router::OrderRouter;
pub use venues::{
    CircuitBreaker, HmacSha256Signer, HyperliquidConnector, LighterConnector, MockVenueConnector,
    RequestSigner, VenueConnector, VenueHandle, VenueRegistry,
};
