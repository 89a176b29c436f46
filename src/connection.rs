use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use signalr_protocol::OutgoingInvocation;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::actor::{ActorCommand, ConnectionActor, ConnectionState};
use crate::config::HubConnectionOptions;
use crate::error::{HubError, HubInvokeError};
use crate::events::HubEvent;
use crate::handlers::{HandlerTable, InvocationContext};
use crate::registry::InvocationRegistry;

/// The timeout an invocation waits for its completion, mirroring the
/// source API's `timeoutMs` parameter (`0` meaning "use `ServerTimeout`",
/// `-1` meaning "wait forever") without the magic sentinel values.
#[derive(Debug, Clone, Copy, Default)]
pub enum InvokeTimeout {
    /// Wait for the connection's configured `server_timeout`. The default.
    #[default]
    ServerTimeout,
    /// Never time out; wait for a completion or a hard close.
    Infinite,
    /// Wait exactly this long.
    After(Duration),
}

/// A connection to a SignalR hub using the JSON Hub Protocol (v1) over
/// WebSocket.
///
/// Cloning is cheap: every clone talks to the same underlying connection
/// actor through the same command channel, registry, and handler table.
#[derive(Clone)]
pub struct HubConnection {
    commands: mpsc::UnboundedSender<ActorCommand>,
    state: crate::actor::SharedState,
    registry: Arc<InvocationRegistry>,
    handlers: Arc<HandlerTable>,
    events: broadcast::Sender<HubEvent>,
    server_timeout: Duration,
}

impl HubConnection {
    /// Build a new, unstarted connection from `options`. Call [`HubConnection::start`]
    /// to actually connect.
    pub fn new(options: HubConnectionOptions) -> Self {
        let registry = InvocationRegistry::new();
        let handlers = Arc::new(HandlerTable::new());
        let (events, _unused_rx) = broadcast::channel(32);
        let server_timeout = options.server_timeout;
        let (commands, state) = ConnectionActor::spawn(
            options,
            Arc::clone(&registry),
            Arc::clone(&handlers),
            events.clone(),
        );
        Self {
            commands,
            state,
            registry,
            handlers,
            events,
            server_timeout,
        }
    }

    /// The connection's current state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connect to the hub and complete the handshake. Returns once the
    /// connection is ready to send and receive invocations.
    pub async fn start(&self) -> Result<(), HubError> {
        if self.state.get() != ConnectionState::Disconnected {
            return Err(HubError::InvalidState("start requires a Disconnected connection"));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Start(reply_tx))
            .map_err(|_| HubError::ConnectionDropped)?;
        reply_rx.await.map_err(|_| HubError::ConnectionDropped)?
    }

    /// Close the connection, optionally carrying an error message on the
    /// outgoing `Close` record. Idempotent: stopping an already-stopped
    /// connection succeeds without effect. Never triggers reconnect.
    pub async fn stop(&self, error_message: Option<String>) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Stop(error_message, reply_tx))
            .map_err(|_| HubError::ConnectionDropped)?;
        reply_rx.await.map_err(|_| HubError::ConnectionDropped)
    }

    /// Register a handler for a client method the hub may invoke.
    ///
    /// `expected_arity` is the number of arguments the callback reads out of
    /// its [`InvocationContext`]; invocations with a different argument
    /// count are dropped and logged rather than dispatched. At most one
    /// handler may be registered per method name.
    pub fn on<F>(&self, method: &str, expected_arity: usize, callback: F) -> Result<(), HubError>
    where
        F: Fn(InvocationContext) + Send + Sync + 'static,
    {
        self.handlers.register(method, expected_arity, callback)
    }

    /// Remove the handler registered for `method`, if any.
    pub fn off(&self, method: &str) {
        self.handlers.remove(method);
    }

    /// Subscribe to [`HubEvent`]s (`Closed`, `Reconnecting`, `Reconnected`).
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Fire-and-forget invocation: send an `Invocation` record with no
    /// invocation id and do not wait for a completion.
    pub async fn send_core(&self, target: &str, arguments: Vec<serde_json::Value>) -> Result<(), HubError> {
        self.require_connected()?;
        let invocation = OutgoingInvocation::new(String::new(), target.to_owned(), arguments);
        let bytes = invocation.encode()?;
        self.send_bytes(bytes).await
    }

    /// Invoke a hub method and await its completion.
    ///
    /// [`InvokeTimeout::ServerTimeout`] (the default) waits as long as the
    /// connection's configured `server_timeout`; [`InvokeTimeout::Infinite`]
    /// waits forever; [`InvokeTimeout::After`] waits exactly the given
    /// duration. A timeout elapsing surfaces as [`HubInvokeError::Timeout`].
    pub async fn invoke_core_async<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<serde_json::Value>,
        timeout: InvokeTimeout,
    ) -> Result<T, HubInvokeError> {
        self.require_connected().map_err(HubInvokeError::Send)?;
        let duration = match timeout {
            InvokeTimeout::ServerTimeout => Some(self.server_timeout),
            InvokeTimeout::Infinite => None,
            InvokeTimeout::After(duration) => Some(duration),
        };
        let (_id, handle) = self.registry.begin(duration);
        let invocation = OutgoingInvocation::new(handle.invocation_id(), target.to_owned(), arguments);
        let bytes = invocation.encode().map_err(HubError::Encode)?;
        self.send_bytes(bytes).await.map_err(HubInvokeError::Send)?;
        handle.value().await
    }

    /// Convenience alias for [`HubConnection::invoke_core_async`], kept for
    /// parity with the source client's separate blocking/future-returning
    /// entry points; both are genuinely `async fn` here, so there is no
    /// behavioral difference between them.
    pub async fn invoke_core<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<serde_json::Value>,
        timeout: InvokeTimeout,
    ) -> Result<T, HubInvokeError> {
        self.invoke_core_async(target, arguments, timeout).await
    }

    fn require_connected(&self) -> Result<(), HubError> {
        if self.state.get() != ConnectionState::Connected {
            return Err(HubError::NotConnected);
        }
        Ok(())
    }

    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Send(bytes, reply_tx))
            .map_err(|_| HubError::ConnectionDropped)?;
        reply_rx.await.map_err(|_| HubError::ConnectionDropped)?
    }
}
