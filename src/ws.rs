//! WebSocket handshake helper.
//!
//! Opens a `tokio-tungstenite` connection for an attach URL with extra
//! handshake headers. Message handling lives in
//! [`WsTransport`](crate::attach::transport::WsTransport).

use anyhow::{Context, Result};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// WebSocket stream over plain TCP or TLS.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Perform the WebSocket handshake against `url`, sending `headers` with
/// the upgrade request.
///
/// # Errors
///
/// Returns an error if the URL or a header is invalid, or the server
/// refuses the upgrade.
pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let extra = headers
        .iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name: {name}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid header value for {name}"))?;
            Ok((name, value))
        })
        .collect::<Result<Vec<_>>>()?;
    request.headers_mut().extend(extra);

    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;
    log::debug!("[Ws] Upgraded with status {}", response.status());
    Ok(stream)
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
