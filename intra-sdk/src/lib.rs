//! Client SDK for the intra LAN chat server.
//!
//! The SDK keeps one persistent WebSocket connection per session, reconnects
//! on a fixed interval when it drops, routes inbound frames to local storage
//! and the consumer, and tracks who is typing.
//!
//! Start a session with [`session::connect`] (real WebSocket transport) or
//! [`session::start`] (custom [`transport::Connector`]), then drive it through
//! the returned [`session::SessionHandle`] and consume [`event::Event`]s.

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;

pub use config::{BROADCAST_IDENTITY, ClientConfig, ConnectionEndpoint};
pub use event::{ConnectionState, Event};
pub use session::{SessionHandle, connect, start};
