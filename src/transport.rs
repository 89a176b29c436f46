// Thin helpers around the WebSocket connection itself. Establishing and
// framing the socket is `tokio-tungstenite`'s job (transport internals are a
// non-goal here); this module only adapts it to the message shape the
// connection actor wants to read and write.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::HubError;

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A received application-level frame: text payloads carry SignalR records,
/// everything else is reported so the caller can decide whether it's fatal.
pub enum Frame {
    Text(Vec<u8>),
    Closed,
}

/// Connect to `uri`, attaching `headers` to the upgrade request.
///
/// `tls_verify` forwards `HubConnectionOptions::tls_verify` to the
/// connector: `true` (the default) uses the platform's native root store,
/// `false` skips certificate validation entirely, matching the source
/// client's `SslVerification` knob for talking to a hub behind a
/// self-signed or otherwise untrusted certificate in development.
pub async fn connect(
    uri: &str,
    headers: &[(String, String)],
    tls_verify: bool,
) -> Result<WsStream, HubError> {
    let mut request = uri
        .into_client_request()
        .map_err(|e| HubError::Connect(e.to_string()))?;
    for (name, value) in headers {
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| HubError::Connect(format!("invalid header value for {name}: {e}")))?;
        request
            .headers_mut()
            .insert(name.parse::<tokio_tungstenite::tungstenite::http::HeaderName>()
                .map_err(|e| HubError::Connect(format!("invalid header name {name}: {e}")))?, header_value);
    }
    let connector = if tls_verify {
        None
    } else {
        Some(Connector::Rustls(Arc::new(insecure_rustls_config())))
    };
    let (ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| HubError::Connect(e.to_string()))?;
    Ok(ws)
}

/// A `rustls` client config that accepts any server certificate. Only
/// reachable through `tls_verify(false)`, which an application should set
/// only against a hub it already trusts out-of-band (e.g. a self-signed
/// certificate in a local development environment).
fn insecure_rustls_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("ring provider supports the default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth()
}

#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Send one already-framed SignalR record (or run of records) as a single
/// text frame.
pub async fn send(ws: &mut WsStream, bytes: Vec<u8>) -> Result<(), HubError> {
    let text = String::from_utf8(bytes)
        .map_err(|e| HubError::Transport(format!("outgoing record was not valid utf-8: {e}")))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| HubError::Transport(e.to_string()))
}

/// Receive the next application frame, transparently answering pings at the
/// transport level (distinct from SignalR's own `Ping` records, which ride
/// inside `Frame::Text`).
pub async fn recv(ws: &mut WsStream) -> Result<Frame, HubError> {
    loop {
        match ws.next().await {
            None => return Ok(Frame::Closed),
            Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_bytes().to_vec())),
            Some(Ok(Message::Binary(_))) => {
                return Err(HubError::Transport(
                    "binary frames are not valid SignalR JSON protocol messages".to_owned(),
                ));
            }
            Some(Ok(Message::Close(_))) => return Ok(Frame::Closed),
            Some(Ok(Message::Ping(data))) => {
                ws.send(Message::Pong(data))
                    .await
                    .map_err(|e| HubError::Transport(e.to_string()))?;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(HubError::Transport(e.to_string())),
        }
    }
}

pub async fn close(ws: &mut WsStream) {
    let _ = ws.close(None).await;
}
