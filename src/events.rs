/// Status events raised on a [`crate::HubConnection`].
///
/// Delivered over a [`tokio::sync::broadcast`] channel so any number of
/// subscribers can observe them; see `HubConnection::subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// The connection ended. `reason` is `None` when the close was
    /// intentional and clean (a caller-initiated `stop()`).
    Closed { reason: Option<String> },
    /// The server permitted a reconnect and the backoff loop has started.
    Reconnecting { error: Option<String> },
    /// The backoff loop reached `Connected` again.
    ///
    /// `connection_id` is always `None` in this client: assigning one is a
    /// negotiation-layer concern, and negotiation is out of scope (the
    /// client connects directly to the WebSocket endpoint).
    Reconnected { connection_id: Option<String> },
}
