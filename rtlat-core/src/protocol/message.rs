use crate::core::{ApiToken, CorrelationId, Leg};
use std::borrow::Cow;
use std::sync::Arc;

/// Synthetic order parameters; only instrument and client id vary per request
pub const ORDER_SIDE: &str = "BUY";
pub const ORDER_TYPE: &str = "LIMIT";
pub const ORDER_PRICE: &str = "1";
pub const ORDER_AMOUNT: &str = "1";
pub const TIME_IN_FORCE: &str = "GOOD_TILL_CANCELLED";

/// The only channel sessions subscribe to
pub const ORDERS_CHANNEL: &str = "ORDERS";

/// A decoded (or to-be-encoded) protocol message
///
/// Strings borrow from the inbound frame where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    // Client → server
    Authenticate {
        api_token: u32,
    },
    Subscribe,
    CreateOrder {
        client_id: Cow<'a, str>,
        instrument_code: Cow<'a, str>,
    },
    CancelOrder {
        client_id: Cow<'a, str>,
        instrument_code: Cow<'a, str>,
    },

    // Server → client
    Authenticated,
    Subscriptions,
    Booked {
        client_id: Cow<'a, str>,
        instrument_code: Option<Cow<'a, str>>,
    },
    Done {
        client_id: Cow<'a, str>,
    },
    Error {
        detail: Cow<'a, str>,
    },

    /// Any other `type` value; logged and ignored
    Unknown {
        kind: Cow<'a, str>,
    },
}

impl Message<'_> {
    /// Wire name of the message type
    pub fn kind(&self) -> &str {
        match self {
            Message::Authenticate { .. } => "AUTHENTICATE",
            Message::Subscribe => "SUBSCRIBE",
            Message::CreateOrder { .. } => "CREATE_ORDER",
            Message::CancelOrder { .. } => "CANCEL_ORDER",
            Message::Authenticated => "AUTHENTICATED",
            Message::Subscriptions => "SUBSCRIPTIONS",
            Message::Booked { .. } => "BOOKED",
            Message::Done { .. } => "DONE",
            Message::Error { .. } => "ERROR",
            Message::Unknown { kind } => kind.as_ref(),
        }
    }

    /// Acknowledgement leg and correlation id, for BOOKED and DONE
    pub fn ack(&self) -> Option<(Leg, &str)> {
        match self {
            Message::Booked { client_id, .. } => Some((Leg::Order, client_id.as_ref())),
            Message::Done { client_id } => Some((Leg::Cancel, client_id.as_ref())),
            _ => None,
        }
    }
}

/// Requests a session sends, before they are rendered to text
///
/// Correlation ids stay as [`CorrelationId`] until encoding so the hot path
/// never allocates a string for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Authenticate(ApiToken),
    Subscribe,
    CreateOrder {
        client_id: CorrelationId,
        instrument: Arc<str>,
    },
    CancelOrder {
        client_id: CorrelationId,
        instrument: Arc<str>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Authenticate(_) => "AUTHENTICATE",
            Request::Subscribe => "SUBSCRIBE",
            Request::CreateOrder { .. } => "CREATE_ORDER",
            Request::CancelOrder { .. } => "CANCEL_ORDER",
        }
    }

    /// Leg whose round trip this request starts, if any
    pub fn leg(&self) -> Option<Leg> {
        match self {
            Request::CreateOrder { .. } => Some(Leg::Order),
            Request::CancelOrder { .. } => Some(Leg::Cancel),
            _ => None,
        }
    }
}
