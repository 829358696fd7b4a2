//! Exchange doubles
//!
//! - `peer`: protocol-level replies of a well-behaved exchange
//! - `loopback`: in-process [`Connector`](crate::session::Connector) driven by the peer
//! - `mock_exchange`: the same peer behind real WebSocket and HTTP sockets

pub mod loopback;
pub mod mock_exchange;
pub mod peer;

pub use loopback::{LoopbackConnector, LoopbackLog, LoopbackTransport};
pub use mock_exchange::MockExchange;
pub use peer::ConformingPeer;
