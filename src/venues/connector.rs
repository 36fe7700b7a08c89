use crate::core::error::VenueError;
use crate::core::events::{
    Balance, CancelAck, OrderAck, OrderStatusReport, Position, UnifiedOrder, VenueId,
};
use crate::types::Symbol;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// The capability set every venue exposes to the core, identical
/// across venues. One concrete implementation per venue; no shared
/// base carries venue-specific fields.
///
/// Implementations normalize every venue-native error, timeout and
/// malformed message into [`VenueError`] at this boundary, and emit
/// normalized price/order/position events plus health transitions on
/// the event bus they were constructed with.
#[async_trait]
pub trait VenueConnector: Send + Sync {
    /// Venue this connector belongs to
    fn venue(&self) -> VenueId;

    /// Establish the live feed. Fails with `VenueError::Unreachable`
    /// if the handshake does not complete within the configured bound.
    /// Callable again after a disconnect; the retained subscription
    /// set is replayed on every successful (re)connect.
    async fn connect(&self) -> Result<(), VenueError>;

    /// Tear down the live feed
    async fn disconnect(&self) -> Result<(), VenueError>;

    /// Whether the live feed is currently up
    fn is_connected(&self) -> bool;

    /// Submit an order. Never blocks past the configured bound; a
    /// timeout surfaces as `VenueError::Ambiguous`, since the venue
    /// may or may not have received the order.
    async fn place_order(&self, order: &UnifiedOrder) -> Result<OrderAck, VenueError>;

    /// Cancel an order by its venue-assigned id
    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck, VenueError>;

    /// Point-in-time status of an order by client order id, used to
    /// reconcile ambiguous submissions. `Ok(None)` is a definitive
    /// "this venue does not know the order".
    async fn fetch_order(
        &self,
        client_order_id: &str,
    ) -> Result<Option<OrderStatusReport>, VenueError>;

    /// Point-in-time position snapshot
    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError>;

    /// Point-in-time balance snapshot
    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError>;

    /// Begin emitting normalized events for the given symbols. The set
    /// is retained and replayed automatically after a reconnect.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), VenueError>;
}

/// Request-signing capability, one per venue. Connectors delegate all
/// signing here and never hold raw credentials themselves.
#[cfg_attr(test, mockall::automock)]
pub trait RequestSigner: Send + Sync {
    /// Produce the authentication headers for a request
    fn sign(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>, VenueError>;
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer producing base64 signatures over
/// `{timestamp}{method}{path}{body}`
pub struct HmacSha256Signer {
    venue: VenueId,
    api_key: String,
    api_secret: String,
}

impl HmacSha256Signer {
    pub fn new(venue: VenueId, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            venue,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    fn signature(&self, payload: &str) -> Result<String, VenueError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| {
            VenueError::Auth {
                venue: self.venue,
                reason: e.to_string(),
            }
        })?;
        mac.update(payload.as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl RequestSigner for HmacSha256Signer {
    fn sign(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>, VenueError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(VenueError::Auth {
                venue: self.venue,
                reason: "missing api credentials".to_string(),
            });
        }
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let payload = format!("{}{}{}{}", timestamp, method, path, body);
        let signature = self.signature(&payload)?;
        Ok(vec![
            ("X-API-KEY".to_string(), self.api_key.clone()),
            ("X-TIMESTAMP".to_string(), timestamp),
            ("X-SIGNATURE".to_string(), signature),
        ])
    }
}
