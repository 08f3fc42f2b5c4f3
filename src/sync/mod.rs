//! Realtime sync with a remote peer: wire format, connection management,
//! reconnect policy and typed subscriptions.

pub mod backoff;
pub mod channel;
pub mod message;
pub mod subscribers;
pub mod transport;

pub use channel::{drift_exceeds, ConnectionState, InboundReactor, SyncChannel};
pub use message::{MessageKind, SyncMessage, SyncPayload, TimerSyncData};
pub use subscribers::Subscription;
pub use transport::{Connector, Frame, TransportLink, WebSocketConnector};
