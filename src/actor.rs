// The connection actor: a single task that owns the transport, the
// handshake/keep-alive/server-timeout deadlines, and the reconnect backoff
// loop. Every other task talks to it through `ActorCommand`s with a oneshot
// reply, mirroring the request/reply-channel pattern this codebase uses for
// its other single-owner state (see `HubConnection` for the public side of
// that channel).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use signalr_protocol::{handshake_request, split_records, parse_record, ping_record, close_record, HandshakeResponse, IncomingRecord};

use crate::config::HubConnectionOptions;
use crate::error::HubError;
use crate::events::HubEvent;
use crate::handlers::HandlerTable;
use crate::registry::InvocationRegistry;
use crate::transport::{self, Frame, WsStream};

/// The four states a [`crate::HubConnection`] can be in.
///
/// Transitions are made exclusively by the connection actor; every other
/// task only ever reads the current state through [`SharedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Connected => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Reconnecting,
            _ => ConnectionState::Connected,
        }
    }
}

/// A handle the public API can read the current state through without
/// taking part in mutating it.
#[derive(Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8())))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

/// The fixed reconnect backoff schedule: four attempts, waiting this long
/// before each one.
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_millis(0),
    Duration::from_millis(2_000),
    Duration::from_millis(10_000),
    Duration::from_millis(30_000),
];

/// Why the connected session ended.
///
/// `allow_reconnect` is `true` for every cause except a server `Close`
/// record that explicitly carried `allowReconnect: false` — that is the one
/// case where the reconnect loop must not run even if the connection was
/// built with `reconnect(true)`.
struct Disconnect {
    reason: Option<String>,
    allow_reconnect: bool,
}

impl Disconnect {
    fn new(reason: Option<String>) -> Self {
        Self { reason, allow_reconnect: true }
    }
}

pub enum ActorCommand {
    Start(oneshot::Sender<Result<(), HubError>>),
    Send(Vec<u8>, oneshot::Sender<Result<(), HubError>>),
    Stop(Option<String>, oneshot::Sender<()>),
}

pub struct ConnectionActor {
    options: HubConnectionOptions,
    registry: Arc<InvocationRegistry>,
    handlers: Arc<HandlerTable>,
    events: broadcast::Sender<HubEvent>,
    commands: mpsc::UnboundedReceiver<ActorCommand>,
    state: SharedState,
    ws: Option<WsStream>,
    /// A disconnect discovered while dispatching records that arrived
    /// concatenated with a handshake reply in the same transport message —
    /// those still need to be dispatched normally once we're Connected.
    /// Consumed at the top of `main_loop` before the select loop starts.
    pending_disconnect: Option<Disconnect>,
}

impl ConnectionActor {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        options: HubConnectionOptions,
        registry: Arc<InvocationRegistry>,
        handlers: Arc<HandlerTable>,
        events: broadcast::Sender<HubEvent>,
    ) -> (mpsc::UnboundedSender<ActorCommand>, SharedState) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = SharedState::new();
        let actor = ConnectionActor {
            options,
            registry,
            handlers,
            events,
            commands: command_rx,
            state: state.clone(),
            ws: None,
            pending_disconnect: None,
        };
        tokio::spawn(actor.run());
        (command_tx, state)
    }

    async fn run(mut self) {
        // Idle until `start()` is called; a dropped sender (the
        // `HubConnection` was dropped before starting) ends the task quietly.
        let Some(cmd) = self.commands.recv().await else {
            return;
        };
        match cmd {
            ActorCommand::Start(reply) => {
                let outcome = self.connect_and_handshake().await;
                let ok = outcome.is_ok();
                let _ = reply.send(outcome);
                if !ok {
                    self.state.set(ConnectionState::Disconnected);
                    return;
                }
            }
            ActorCommand::Stop(_, reply) => {
                let _ = reply.send(());
                return;
            }
            ActorCommand::Send(_, reply) => {
                let _ = reply.send(Err(HubError::InvalidState("not started")));
                return;
            }
        }

        self.main_loop().await;
    }

    async fn connect_and_handshake(&mut self) -> Result<(), HubError> {
        self.state.set(ConnectionState::Connecting);
        let mut ws = transport::connect(&self.options.uri, &self.options.headers, self.options.tls_verify).await?;
        transport::send(&mut ws, handshake_request()).await?;

        let handshake = tokio::time::timeout(self.options.handshake_timeout, transport::recv(&mut ws));
        let frame = match handshake.await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(HubError::HandshakeTimeout),
        };
        let bytes = match frame {
            Frame::Text(bytes) => bytes,
            Frame::Closed => return Err(HubError::Handshake("connection closed during handshake".to_owned())),
        };
        // The handshake reply is the first record in the message; a server
        // may concatenate further records (an `Invocation`, even a `Close`)
        // into the same transport message, which still need to be dispatched
        // normally once we're Connected.
        let mut fragments = split_records(&bytes).into_iter();
        let handshake_fragment = fragments.next().unwrap_or(&[][..]);
        let response: HandshakeResponse = serde_json::from_slice(handshake_fragment)
            .map_err(|e| HubError::Handshake(format!("malformed handshake response: {e}")))?;
        if let Some(error) = response.error {
            return Err(HubError::Handshake(error));
        }

        self.ws = Some(ws);
        self.state.set(ConnectionState::Connected);
        tracing::info!("hub connection established");

        self.pending_disconnect = self.dispatch_fragments(fragments);
        Ok(())
    }

    async fn main_loop(&mut self) {
        loop {
            if let Some(disconnect) = self.pending_disconnect.take() {
                if !self.handle_disconnect(disconnect).await {
                    return;
                }
                continue;
            }

            let mut keep_alive_deadline = Instant::now() + self.options.keep_alive_interval;
            let mut server_timeout_deadline = Instant::now() + self.options.server_timeout;

            let disconnect = 'connected: loop {
                let ws = self.ws.as_mut().expect("connected state always has a transport");
                tokio::select! {
                    biased;

                    command = self.commands.recv() => {
                        match command {
                            Some(ActorCommand::Stop(message, reply)) => {
                                self.close_intentionally(message).await;
                                let _ = reply.send(());
                                return;
                            }
                            Some(ActorCommand::Send(bytes, reply)) => {
                                match transport::send(ws, bytes).await {
                                    Ok(()) => {
                                        keep_alive_deadline = Instant::now() + self.options.keep_alive_interval;
                                        let _ = reply.send(Ok(()));
                                    }
                                    Err(e) => {
                                        let reason = e.to_string();
                                        let _ = reply.send(Err(e));
                                        break 'connected Disconnect::new(Some(reason));
                                    }
                                }
                            }
                            Some(ActorCommand::Start(reply)) => {
                                let _ = reply.send(Err(HubError::InvalidState("already started")));
                            }
                            None => {
                                self.close_intentionally(None).await;
                                return;
                            }
                        }
                    }

                    frame = transport::recv(ws) => {
                        match frame {
                            Ok(Frame::Text(bytes)) => {
                                server_timeout_deadline = Instant::now() + self.options.server_timeout;
                                if let Some(disconnect) = self.dispatch_message(&bytes) {
                                    break 'connected disconnect;
                                }
                            }
                            Ok(Frame::Closed) => break 'connected Disconnect::new(None),
                            Err(e) => break 'connected Disconnect::new(Some(e.to_string())),
                        }
                    }

                    () = tokio::time::sleep_until(keep_alive_deadline) => {
                        if let Err(e) = transport::send(ws, ping_record()).await {
                            break 'connected Disconnect::new(Some(e.to_string()));
                        }
                        keep_alive_deadline = Instant::now() + self.options.keep_alive_interval;
                    }

                    () = tokio::time::sleep_until(server_timeout_deadline) => {
                        break 'connected Disconnect::new(Some("server timed out".to_owned()));
                    }
                }
            };

            if !self.handle_disconnect(disconnect).await {
                return;
            }
        }
    }

    /// Parse and act on one transport message. Returns `Some(disconnect)` if
    /// the message requires the connection to end (a `Close` record).
    fn dispatch_message(&self, bytes: &[u8]) -> Option<Disconnect> {
        if !signalr_protocol::is_well_terminated(bytes) {
            tracing::warn!("non-SignalR message: transport message did not end with the record separator");
        }
        self.dispatch_fragments(split_records(bytes).into_iter())
    }

    /// Parse and act on a run of already-split record fragments. Returns
    /// `Some(disconnect)` as soon as a `Close` record requires the
    /// connection to end; any fragments after that point are left
    /// undispatched.
    fn dispatch_fragments<'a>(&self, fragments: impl Iterator<Item = &'a [u8]>) -> Option<Disconnect> {
        for fragment in fragments {
            match parse_record(fragment) {
                Ok(IncomingRecord::Invocation { target, arguments, invocation_id: _ }) => {
                    use crate::handlers::DispatchOutcome;
                    match self.handlers.dispatch(&target, arguments) {
                        DispatchOutcome::Dispatched => {}
                        DispatchOutcome::NoHandler => {
                            tracing::info!(method = %target, "no handler registered for invocation target");
                        }
                        DispatchOutcome::ArityMismatch { expected, actual } => {
                            tracing::warn!(method = %target, expected, actual, "argument count mismatch for invocation target");
                        }
                    }
                }
                Ok(IncomingRecord::Completion { invocation_id, result, error }) => {
                    if let Some(error) = error {
                        self.registry.fail(&invocation_id, error);
                    } else {
                        let result = result.unwrap_or_else(|| {
                            serde_json::value::RawValue::from_string("null".to_owned())
                                .expect("literal null is valid json")
                        });
                        self.registry.complete(&invocation_id, result);
                    }
                }
                Ok(IncomingRecord::Ping) => {}
                Ok(IncomingRecord::Close { error, allow_reconnect }) => {
                    let reason = error.unwrap_or_else(|| {
                        if allow_reconnect {
                            "server requested close".to_owned()
                        } else {
                            "server closed the connection".to_owned()
                        }
                    });
                    return Some(Disconnect { reason: Some(reason), allow_reconnect });
                }
                Ok(IncomingRecord::StreamingUnsupported { type_code }) => {
                    tracing::warn!(type_code, "dropping unsupported streaming record");
                }
                Ok(IncomingRecord::Unknown { type_code }) => {
                    tracing::debug!(?type_code, "dropping unrecognized record type");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed record");
                }
            }
        }
        None
    }

    /// A disconnect happened (transport error, clean close, server timeout,
    /// or a server `Close` record). Attempt the reconnect backoff if
    /// configured and the disconnect permits it; otherwise tear the
    /// connection down for good.
    ///
    /// Returns `true` if the caller should keep running the main loop
    /// (a reconnect succeeded), `false` if the actor task should end.
    async fn handle_disconnect(&mut self, disconnect: Disconnect) -> bool {
        self.ws = None;
        if !(self.options.reconnect && disconnect.allow_reconnect) {
            self.hard_close(disconnect.reason).await;
            return false;
        }

        self.state.set(ConnectionState::Reconnecting);
        let _ = self.events.send(HubEvent::Reconnecting { error: disconnect.reason.clone() });
        tracing::warn!(reason = ?disconnect.reason, "connection lost, attempting reconnect");

        let mut last_error = None;
        for (attempt, delay) in RECONNECT_DELAYS.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            match self.connect_and_handshake().await {
                Ok(()) => {
                    let _ = self.events.send(HubEvent::Reconnected { connection_id: None });
                    tracing::info!(attempt, "reconnected");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let message = format!(
            "Reconnect failed with message: {}",
            last_error.unwrap_or_else(|| "unknown error".to_owned())
        );
        self.hard_close(Some(message)).await;
        false
    }

    async fn close_intentionally(&mut self, error_message: Option<String>) {
        if let Some(ws) = self.ws.as_mut() {
            let _ = transport::send(ws, close_record(error_message.as_deref())).await;
            transport::close(ws).await;
        }
        self.ws = None;
        self.state.set(ConnectionState::Disconnected);
        self.registry.close_all("HubConnection was closed");
        let _ = self.events.send(HubEvent::Closed { reason: error_message });
    }

    async fn hard_close(&mut self, reason: Option<String>) {
        if let Some(ws) = self.ws.as_mut() {
            transport::close(ws).await;
        }
        self.ws = None;
        self.state.set(ConnectionState::Disconnected);
        self.registry.close_all("HubConnection was closed");
        let _ = self.events.send(HubEvent::Closed { reason });
    }
}

