pub mod breaker;
pub mod connector;
pub mod hyperliquid;
pub mod lighter;
pub mod mock;
pub mod registry;

pub use breaker::CircuitBreaker;
pub use connector::{HmacSha256Signer, RequestSigner, VenueConnector};
pub use hyperliquid::HyperliquidConnector;
pub use lighter::LighterConnector;
pub use mock::MockVenueConnector;
pub use registry::{VenueHandle, VenueRegistry};
