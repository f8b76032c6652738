//! Transport abstraction for the attach channel.
//!
//! The session only needs an ordered, reliable, message-oriented duplex
//! pipe. [`Transport`] captures that; [`Connector`] performs the handshake
//! that produces one.
//!
//! # Architecture
//!
//! ```text
//! Connector (trait) ──connect(AttachRequest)──► Transport (trait)
//!     │                                              │
//!     ├── WsConnector ─────────────────────────────► WsTransport (tokio-tungstenite)
//!     │
//!     └── MemoryConnector ─────────────────────────► MemoryTransport (in-process)
//! ```
//!
//! # Credentials
//!
//! The attach endpoint authenticates the handshake itself. Browsers cannot
//! attach headers to a WebSocket handshake, so the server also accepts the
//! bearer credential as an `auth_token` query parameter. [`AttachRequest`]
//! supports both placements; the header form is preferred.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tokio_tungstenite::tungstenite::Message;

use crate::constants::{AUTH_TOKEN_PARAM, TOOLSET_API_PATH, TRANSPORT_CLOSE_TIMEOUT};
use crate::ws::{self, WsStream};

/// Errors raised by a transport or its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server URL or instance id cannot form an attach URL.
    #[error("invalid attach target: {0}")]
    InvalidTarget(String),
    /// The connection could not be established.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The connection failed mid-stream.
    #[error("transport error: {0}")]
    Io(String),
    /// The remote closed the connection.
    #[error("connection closed by remote")]
    ClosedByRemote,
}

/// Where the bearer credential is placed on the attach handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPlacement {
    /// `Authorization: Bearer <token>` handshake header.
    #[default]
    Header,
    /// `auth_token=Bearer <token>` query parameter.
    QueryParameter,
}

impl std::str::FromStr for CredentialPlacement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "header" => Ok(Self::Header),
            "query" | "query_parameter" => Ok(Self::QueryParameter),
            other => Err(format!("unknown credential placement: {other}")),
        }
    }
}

/// Everything needed to open an attach connection for one instance.
#[derive(Clone)]
pub struct AttachRequest {
    server_url: String,
    instance_id: String,
    token: Option<String>,
    placement: CredentialPlacement,
}

impl std::fmt::Debug for AttachRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachRequest")
            .field("server_url", &self.server_url)
            .field("instance_id", &self.instance_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("placement", &self.placement)
            .finish()
    }
}

impl AttachRequest {
    /// Create a request for `instance_id` on the server at `server_url`.
    ///
    /// `server_url` may use `http(s)://` or `ws(s)://`.
    pub fn new(server_url: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            instance_id: instance_id.into(),
            token: None,
            placement: CredentialPlacement::default(),
        }
    }

    /// Attach a bearer token, placed according to `placement`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, placement: CredentialPlacement) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self.placement = placement;
        self
    }

    /// The instance this request attaches to.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Credential placement in effect.
    pub fn placement(&self) -> CredentialPlacement {
        self.placement
    }

    /// Build the WebSocket URL of the attach endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTarget`] if the server URL cannot be
    /// parsed or cannot carry a path.
    pub fn url(&self) -> Result<Url, TransportError> {
        if self.instance_id.is_empty() {
            return Err(TransportError::InvalidTarget("empty instance id".to_string()));
        }
        let base = ws::http_to_ws_scheme(self.server_url.trim_end_matches('/'));
        let mut url = Url::parse(&base)
            .map_err(|e| TransportError::InvalidTarget(format!("{base}: {e}")))?;

        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidTarget(format!("{base}: cannot be a base URL")))?
            .pop_if_empty()
            .extend(TOOLSET_API_PATH.split('/').filter(|s| !s.is_empty()))
            .extend(["instances", self.instance_id.as_str(), "attach"]);

        if let (Some(token), CredentialPlacement::QueryParameter) = (&self.token, self.placement) {
            url.query_pairs_mut()
                .append_pair(AUTH_TOKEN_PARAM, &format!("Bearer {token}"));
        }
        Ok(url)
    }

    /// Handshake headers to send with the upgrade request.
    pub fn headers(&self) -> Vec<(String, String)> {
        match (&self.token, self.placement) {
            (Some(token), CredentialPlacement::Header) => {
                vec![("Authorization".to_string(), format!("Bearer {token}"))]
            }
            _ => Vec::new(),
        }
    }
}

/// An ordered, reliable, message-oriented duplex connection.
///
/// One call to [`Transport::send`] produces exactly one message on the
/// remote side, and [`Transport::recv`] yields messages in arrival order.
#[async_trait]
pub trait Transport: Send {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the connection is unusable.
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next message.
    ///
    /// Returns `None` once the remote has closed the connection.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// Performs the handshake that yields a [`Transport`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// The transport produced by a successful handshake.
    type Transport: Transport;

    /// Open a connection for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTarget`] or
    /// [`TransportError::Handshake`] if no connection could be made.
    async fn connect(&self, request: &AttachRequest) -> Result<Self::Transport, TransportError>;
}

/// Connects over WebSocket using `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, request: &AttachRequest) -> Result<WsTransport, TransportError> {
        let url = request.url()?;
        log::info!("[Attach] Connecting to {}", url.path());
        let stream = ws::connect(url.as_str(), &request.headers())
            .await
            .map_err(|e| TransportError::Handshake(format!("{e:#}")))?;

        Ok(WsTransport {
            stream,
            closed: false,
        })
    }
}

/// WebSocket-backed [`Transport`]: one binary message per frame.
#[derive(Debug)]
pub struct WsTransport {
    stream: WsStream,
    closed: bool,
}

impl WsTransport {
    async fn shutdown(&mut self) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.stream.send(Message::Close(None)).await?;
        SinkExt::close(&mut self.stream).await
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Io("transport already closed".to_string()));
        }
        self.stream
            .send(Message::Binary(message))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Some(Ok(data.to_vec())),
                Some(Ok(Message::Text(text))) => {
                    log::warn!(
                        "[Attach] Ignoring text message ({} bytes); protocol is binary",
                        text.len()
                    );
                }
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => log::info!(
                            "[Attach] Remote closed connection: {} {}",
                            u16::from(frame.code),
                            frame.reason
                        ),
                        None => log::info!("[Attach] Remote closed connection"),
                    }
                    self.closed = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(TransportError::Io(e.to_string()))),
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, self.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("[Attach] Close handshake failed: {e}"),
            Err(_) => log::warn!(
                "[Attach] Peer did not accept close within {:?}; dropping connection",
                TRANSPORT_CLOSE_TIMEOUT
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_token() {
        let request = AttachRequest::new("http://localhost:8080", "abc123");
        assert_eq!(
            request.url().unwrap().as_str(),
            "ws://localhost:8080/api/v1/admin/toolset/instances/abc123/attach"
        );
        assert!(request.headers().is_empty());
    }

    #[test]
    fn test_url_keeps_base_path_and_upgrades_tls() {
        let request = AttachRequest::new("https://example.com/dashboard/", "abc123");
        assert_eq!(
            request.url().unwrap().as_str(),
            "wss://example.com/dashboard/api/v1/admin/toolset/instances/abc123/attach"
        );
    }

    #[test]
    fn test_query_parameter_placement() {
        let request = AttachRequest::new("http://localhost:8080", "abc123")
            .with_token("tok.en", CredentialPlacement::QueryParameter);
        let url = request.url().unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("auth_token".to_string(), "Bearer tok.en".to_string())]);
        assert!(request.headers().is_empty());
    }

    #[test]
    fn test_header_placement() {
        let request = AttachRequest::new("http://localhost:8080", "abc123")
            .with_token("tok", CredentialPlacement::Header);
        assert!(request.url().unwrap().query().is_none());
        assert_eq!(
            request.headers(),
            vec![("Authorization".to_string(), "Bearer tok".to_string())]
        );
    }

    #[test]
    fn test_empty_token_is_no_credential() {
        let request = AttachRequest::new("http://localhost:8080", "abc123")
            .with_token("", CredentialPlacement::QueryParameter);
        assert!(request.url().unwrap().query().is_none());
    }

    #[test]
    fn test_instance_id_is_path_escaped() {
        let request = AttachRequest::new("http://localhost:8080", "a/b c");
        let url = request.url().unwrap();
        assert!(url.path().ends_with("/instances/a%2Fb%20c/attach"));
    }

    #[test]
    fn test_invalid_targets() {
        assert!(matches!(
            AttachRequest::new("not a url", "abc").url(),
            Err(TransportError::InvalidTarget(_))
        ));
        assert!(matches!(
            AttachRequest::new("http://localhost", "").url(),
            Err(TransportError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let request = AttachRequest::new("http://localhost", "abc")
            .with_token("secret-token", CredentialPlacement::Header);
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_credential_placement_from_str() {
        assert_eq!("header".parse::<CredentialPlacement>(), Ok(CredentialPlacement::Header));
        assert_eq!("query".parse::<CredentialPlacement>(), Ok(CredentialPlacement::QueryParameter));
        assert!("cookie".parse::<CredentialPlacement>().is_err());
    }

    #[tokio::test]
    async fn test_ws_connector_unreachable_is_handshake_error() {
        let request = AttachRequest::new("http://127.0.0.1:1", "abc");
        let result = WsConnector.connect(&request).await;
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }
}
