//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{
        error::Error as WsError,
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
    MaybeTlsStream,
};
use url::Url;

use super::transport::{Connector, FrameSink, FrameStream, InboundFrame};
use crate::{
    error::{RelayLinkError, Result},
    models::ConnectionOptions,
};

type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` / `wss://` transports. `http(s)://` URLs are accepted and
/// mapped to the matching WebSocket scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let ws_url = resolve_ws_url(url)?;
        log::debug!("[relay-link] Opening WebSocket to {}", ws_url);

        let tls = if options.trust_all_certificates {
            log::warn!("[relay-link] TLS certificate verification disabled for {}", ws_url);
            Some(tokio_tungstenite::Connector::Rustls(Arc::new(insecure_tls_config()?)))
        } else {
            None
        };

        let (stream, _response) = connect_async_tls_with_config(ws_url.as_str(), None, true, tls)
            .await
            .map_err(map_handshake_error)?;

        let (sink, stream) = stream.split();
        Ok((
            Box::new(WebSocketSink { sink, closed: false }),
            Box::new(WebSocketFrames { stream }),
        ))
    }
}

struct WebSocketSink {
    sink: SplitSink<WebSocketStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(RelayLinkError::WebSocketError("Transport already closed".to_string()));
        }
        self.sink
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| RelayLinkError::WebSocketError(format!("Failed to send frame: {}", e)))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {},
            Err(e) => {
                return Err(RelayLinkError::WebSocketError(format!("Failed to close: {}", e)));
            },
        }
        let _ = self.sink.close().await;
        Ok(())
    }
}

struct WebSocketFrames {
    stream: SplitStream<WebSocketStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(RelayLinkError::WebSocketError(e.to_string()))),
            };
            // Pings are answered by tungstenite itself on the next read/write.
            match frame {
                Message::Text(text) => return Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
                Message::Binary(data) => return Some(decode_binary(&data).map(InboundFrame::Text)),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_owned()),
                        None => (None, "Server closed connection".to_string()),
                    };
                    return Some(Ok(InboundFrame::Closed { code, reason }));
                },
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// Binary frames carry the same envelope text, UTF-8 encoded.
fn decode_binary(data: &Bytes) -> Result<String> {
    std::str::from_utf8(data).map(str::to_owned).map_err(|e| {
        RelayLinkError::WebSocketError(format!("Binary frame is not valid UTF-8: {}", e))
    })
}

fn map_handshake_error(err: WsError) -> RelayLinkError {
    match err {
        WsError::Http(response) => {
            let message = match response.status().as_u16() {
                401 => "Unauthorized: WebSocket requires valid credentials".to_string(),
                403 => "Forbidden: Access to WebSocket denied".to_string(),
                code => format!("WebSocket HTTP error: {}", code),
            };
            RelayLinkError::WebSocketError(message)
        },
        other => RelayLinkError::WebSocketError(format!("Connection failed: {}", other)),
    }
}

/// Normalise a server URL into a WebSocket URL.
pub(crate) fn resolve_ws_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|e| {
        RelayLinkError::ConfigurationError(format!("Invalid server URL '{}': {}", raw, e))
    })?;

    if url.host_str().is_none() {
        return Err(RelayLinkError::ConfigurationError(format!(
            "Server URL '{}' must include a host",
            raw
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(RelayLinkError::ConfigurationError(
            "Server URL must not include username/password credentials".to_string(),
        ));
    }

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RelayLinkError::ConfigurationError(format!(
                "Unsupported URL scheme '{}'; expected ws(s) or http(s)",
                other
            )));
        },
    };
    url.set_scheme(ws_scheme).map_err(|_| {
        RelayLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    url.set_fragment(None);

    Ok(url)
}

fn insecure_tls_config() -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayLinkError::ConfigurationError(format!("TLS setup failed: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(config)
}

/// Certificate verifier used when `trust_all_certificates` is set.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
