use crate::core::events::{OrderStatus, VenueId};
use std::fmt;

/// Error surfaced at the venue connector boundary. All venue-native
/// errors, timeouts and malformed data are normalized into one of
/// these variants; nothing above the connector sees venue-specific
/// error shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Initial handshake or reconnect did not complete in time
    Unreachable { venue: VenueId, reason: String },
    /// Circuit breaker is open; no network call was attempted
    Unavailable { venue: VenueId },
    /// A mutating call timed out: the venue may or may not have
    /// received it. Requires reconciliation, never a retry.
    Ambiguous { venue: VenueId, reason: String },
    /// Transient network or protocol failure, including malformed data
    Protocol { venue: VenueId, reason: String },
    /// The venue answered and refused the request
    Rejected { venue: VenueId, reason: String },
    /// Request signing or credential failure
    Auth { venue: VenueId, reason: String },
    /// The venue does not know the referenced order
    OrderNotFound { venue: VenueId, order_id: String },
}

impl VenueError {
    pub fn venue(&self) -> VenueId {
        match self {
            VenueError::Unreachable { venue, .. }
            | VenueError::Unavailable { venue }
            | VenueError::Ambiguous { venue, .. }
            | VenueError::Protocol { venue, .. }
            | VenueError::Rejected { venue, .. }
            | VenueError::Auth { venue, .. }
            | VenueError::OrderNotFound { venue, .. } => *venue,
        }
    }

    /// Whether this error counts against the venue's circuit breaker.
    /// `Rejected` and `OrderNotFound` are completed round trips, so the
    /// venue itself is healthy; `Unavailable` never reached the wire.
    pub fn is_venue_failure(&self) -> bool {
        matches!(
            self,
            VenueError::Unreachable { .. }
                | VenueError::Ambiguous { .. }
                | VenueError::Protocol { .. }
                | VenueError::Auth { .. }
        )
    }
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueError::Unreachable { venue, reason } => {
                write!(f, "venue {} unreachable: {}", venue, reason)
            }
            VenueError::Unavailable { venue } => {
                write!(f, "venue {} unavailable: circuit breaker open", venue)
            }
            VenueError::Ambiguous { venue, reason } => {
                write!(f, "ambiguous outcome on {}: {}", venue, reason)
            }
            VenueError::Protocol { venue, reason } => {
                write!(f, "protocol error on {}: {}", venue, reason)
            }
            VenueError::Rejected { venue, reason } => {
                write!(f, "rejected by {}: {}", venue, reason)
            }
            VenueError::Auth { venue, reason } => {
                write!(f, "authentication failed for {}: {}", venue, reason)
            }
            VenueError::OrderNotFound { venue, order_id } => {
                write!(f, "order {} not found on {}", order_id, venue)
            }
        }
    }
}

impl std::error::Error for VenueError {}

/// Error surfaced by the order router to its callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Caller input malformed; never retried, no connector call made
    Validation { field: &'static str, message: String },
    /// A record already exists for this client order id
    DuplicateClientOrderId(String),
    /// Explicitly requested venue has an open breaker
    VenueUnavailable(VenueId),
    /// Automatic routing found no venue eligible for the order
    NoEligibleVenue,
    /// No record exists for the referenced client order id
    OrderNotFound(String),
    /// Cancel requested in a state that does not allow it
    CancelRejected {
        client_order_id: String,
        status: OrderStatus,
    },
    /// Normalized venue failure passed through to the caller
    Venue(VenueError),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Validation { field, message } => {
                write!(f, "order validation failed for {}: {}", field, message)
            }
            RouteError::DuplicateClientOrderId(id) => {
                write!(f, "duplicate client order id: {}", id)
            }
            RouteError::VenueUnavailable(venue) => {
                write!(f, "venue {} unavailable: circuit breaker open", venue)
            }
            RouteError::NoEligibleVenue => write!(f, "no eligible venue for automatic routing"),
            RouteError::OrderNotFound(id) => write!(f, "order not found: {}", id),
            RouteError::CancelRejected {
                client_order_id,
                status,
            } => write!(
                f,
                "cancel rejected for {}: order is {:?}",
                client_order_id, status
            ),
            RouteError::Venue(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouteError::Venue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VenueError> for RouteError {
    fn from(e: VenueError) -> Self {
        match e {
            VenueError::Unavailable { venue } => RouteError::VenueUnavailable(venue),
            other => RouteError::Venue(other),
        }
    }
}
