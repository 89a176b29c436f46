//! An async client for the SignalR Hub Protocol v1 (JSON) over WebSocket.
//!
//! A [`HubConnection`] owns one WebSocket connection to a hub endpoint: it
//! performs the JSON handshake, keeps the connection alive with periodic
//! pings, watches for a silent server, and — when configured — reconnects
//! on a fixed backoff schedule after an unexpected drop. Invocations sent
//! with [`HubConnection::invoke_core_async`] are correlated to their
//! completion by invocation id; client methods the hub calls are dispatched
//! to callbacks registered with [`HubConnection::on`].
//!
//! Out of scope: the WebSocket transport itself (delegated to
//! `tokio-tungstenite`), JSON encoding (delegated to `serde_json`),
//! streaming invocations, and server-initiated negotiation — this client
//! connects directly to a known WebSocket endpoint.

mod actor;
mod config;
mod connection;
mod error;
mod events;
mod handlers;
mod registry;
mod transport;

pub use config::{HubConnectionBuilder, HubConnectionOptions};
pub use connection::{HubConnection, InvokeTimeout};
pub use error::{HubError, HubInvokeError};
pub use events::HubEvent;
pub use handlers::InvocationContext;

pub use actor::ConnectionState;
