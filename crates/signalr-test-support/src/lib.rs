// signalr-test-support: a scriptable mock SignalR hub server for integration tests.
//
// Binds to a random local port and hands each accepted WebSocket connection
// to the test as a `MockHubConnection`, which the test drives directly
// (read the handshake, reply, send completions/pings/closes) rather than
// following a single baked-in script. This mirrors the accept-loop-plus-
// per-connection-handle shape used elsewhere in this codebase's test
// utilities, but leaves the conversation itself up to the caller since
// hub connection tests each need a different scripted exchange.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use signalr_protocol::RECORD_SEPARATOR;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock SignalR hub server for integration testing.
///
/// Binds to `127.0.0.1:0` (a random free port) and accepts connections in a
/// background task; each accepted connection is handed to the test through
/// [`MockHubServer::accept`].
pub struct MockHubServer {
    addr: SocketAddr,
    conn_rx: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockHubServer {
    /// Start the mock hub, binding to a random available port.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                if conn_tx.send(ws).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            addr,
            conn_rx,
            _task: task,
        })
    }

    /// The `ws://127.0.0.1:<port>` URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for and return the next accepted connection.
    pub async fn accept(&mut self) -> MockHubConnection {
        let ws = self
            .conn_rx
            .recv()
            .await
            .expect("mock hub server accept loop ended unexpectedly");
        MockHubConnection { ws }
    }
}

/// One accepted WebSocket connection, driven directly by the test.
pub struct MockHubConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockHubConnection {
    /// Read one raw transport message (a text frame's bytes), transparently
    /// answering pings so the test only sees application traffic.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(text.as_bytes().to_vec()),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(data)) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Send a raw already-framed record (or concatenation of records).
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let text = std::str::from_utf8(bytes).expect("mock hub only sends text frames");
        let _ = self.ws.send(Message::Text(text.to_owned().into())).await;
    }

    /// Read the client's handshake request record and assert its shape.
    pub async fn expect_handshake(&mut self) {
        let bytes = self
            .recv_raw()
            .await
            .expect("connection closed before handshake");
        assert_eq!(bytes.last(), Some(&RECORD_SEPARATOR).copied().as_ref());
        let body = &bytes[..bytes.len() - 1];
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(value["protocol"], "json");
        assert_eq!(value["version"], 1);
    }

    /// Reply to the handshake with the standard empty-object success body.
    pub async fn accept_handshake(&mut self) {
        self.send_raw(b"{}\x1e").await;
    }

    /// Reply to the handshake with a protocol error.
    pub async fn fail_handshake(&mut self, error: &str) {
        let escaped = serde_json::to_string(error).unwrap();
        let mut body = format!(r#"{{"error":{escaped}}}"#).into_bytes();
        body.push(RECORD_SEPARATOR);
        self.send_raw(&body).await;
    }

    /// Send a `Completion` record carrying a successful result.
    pub async fn send_completion(&mut self, invocation_id: &str, result: serde_json::Value) {
        let mut body =
            format!(r#"{{"type":3,"invocationId":"{invocation_id}","result":{result}}}"#)
                .into_bytes();
        body.push(RECORD_SEPARATOR);
        self.send_raw(&body).await;
    }

    /// Send a `Completion` record carrying a server-side error.
    pub async fn send_completion_error(&mut self, invocation_id: &str, error: &str) {
        let escaped = serde_json::to_string(error).unwrap();
        let mut body =
            format!(r#"{{"type":3,"invocationId":"{invocation_id}","error":{escaped}}}"#)
                .into_bytes();
        body.push(RECORD_SEPARATOR);
        self.send_raw(&body).await;
    }

    /// Send an `Invocation` record, as a hub would when calling back into
    /// the client.
    pub async fn send_invocation(&mut self, target: &str, arguments: &[serde_json::Value]) {
        let args = serde_json::to_string(arguments).unwrap();
        let mut body = format!(r#"{{"type":1,"target":"{target}","arguments":{args}}}"#)
            .into_bytes();
        body.push(RECORD_SEPARATOR);
        self.send_raw(&body).await;
    }

    pub async fn send_ping(&mut self) {
        self.send_raw(signalr_protocol::ping_record().as_slice())
            .await;
    }

    /// Send a `Close` record, optionally permitting reconnect.
    pub async fn send_close(&mut self, allow_reconnect: bool, error: Option<&str>) {
        let mut body = match error {
            Some(msg) => {
                let escaped = serde_json::to_string(msg).unwrap();
                format!(r#"{{"type":7,"allowReconnect":{allow_reconnect},"error":{escaped}}}"#)
            }
            None => format!(r#"{{"type":7,"allowReconnect":{allow_reconnect}}}"#),
        }
        .into_bytes();
        body.push(RECORD_SEPARATOR);
        self.send_raw(&body).await;
    }

    /// Drop the connection without sending a close frame, simulating a
    /// network failure or a server timing out a dead peer.
    pub async fn drop_silently(self) {
        drop(self.ws);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_starts_and_reports_a_real_port() {
        let server = MockHubServer::start().await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn accept_completes_the_handshake() {
        let mut server = MockHubServer::start().await.unwrap();
        let url = server.url();

        let client = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            ws.send(Message::Text(
                r#"{"protocol":"json","version":1}"#.to_owned().into(),
            ))
            .await
            .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            assert_eq!(reply, Message::Text("{}".to_owned().into()));
        });

        let mut conn = server.accept().await;
        conn.expect_handshake().await;
        conn.accept_handshake().await;
        client.await.unwrap();
    }
}
