use std::fmt;

/// Errors surfaced from the non-per-invocation operations on [`crate::HubConnection`].
///
/// Per-invocation failures (a server error reply, or a ticket timing out)
/// are a separate, narrower type: [`HubInvokeError`].
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// `start()` was called while the connection was not `Disconnected`, or
    /// a send was attempted while not `Connected`.
    #[error("invalid connection state for this operation: {0}")]
    InvalidState(&'static str),

    /// The transport failed to establish a connection.
    #[error("transport connect failed: {0}")]
    Connect(String),

    /// The handshake reply carried a non-null `error` field.
    #[error("handshake rejected by server: {0}")]
    Handshake(String),

    /// The handshake watchdog expired before a reply arrived.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// A lower-level transport error (send/recv failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to encode an outgoing message.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// A handler was already registered for this method name.
    #[error("a handler is already registered for method {0:?}")]
    DuplicateHandler(String),

    /// A send or invoke was attempted while the connection was not `Connected`.
    #[error("not connected")]
    NotConnected,

    /// The actor task is gone; the connection has been torn down.
    #[error("the hub connection has shut down")]
    ConnectionDropped,
}

/// The outcome of a single `invoke_core`/`invoke_core_async` call.
#[derive(Debug, thiserror::Error)]
pub enum HubInvokeError {
    /// The invocation's timeout elapsed with no completion from the server.
    #[error("invocation timed out waiting for a completion")]
    Timeout,

    /// The server sent a `Completion` record carrying an `error` string.
    #[error("server returned an error: {0}")]
    Server(String),

    /// The connection was closed (or the ticket was cancelled as part of
    /// `close_all`) before a completion arrived.
    #[error("hub connection was closed")]
    ConnectionClosed,

    /// The completion's `result` could not be deserialized into the
    /// caller's requested type.
    #[error("failed to deserialize invocation result: {0}")]
    Deserialize(serde_json::Error),

    /// The invocation could not be sent at all (e.g. not connected).
    #[error("failed to send invocation: {0}")]
    Send(#[from] HubError),
}

impl fmt::Display for crate::actor::ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            crate::actor::ConnectionState::Disconnected => "Disconnected",
            crate::actor::ConnectionState::Connecting => "Connecting",
            crate::actor::ConnectionState::Reconnecting => "Reconnecting",
            crate::actor::ConnectionState::Connected => "Connected",
        };
        f.write_str(name)
    }
}
