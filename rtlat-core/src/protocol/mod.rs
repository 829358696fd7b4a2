//! Exchange wire protocol
//!
//! Text frames carrying JSON objects discriminated by a `type` field:
//!
//! ```text
//! client → server   AUTHENTICATE, SUBSCRIBE, CREATE_ORDER, CANCEL_ORDER
//! server → client   AUTHENTICATED, SUBSCRIPTIONS, BOOKED, DONE, ERROR
//! ```

pub mod codec;
pub mod message;

pub use codec::{Codec, UUID_TEXT_LEN};
pub use message::{
    Message, Request, ORDER_AMOUNT, ORDER_PRICE, ORDER_SIDE, ORDER_TYPE, ORDERS_CHANNEL,
    TIME_IN_FORCE,
};
