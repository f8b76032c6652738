//! In-process transport for driving a session without a socket.
//!
//! [`memory_pair`] returns the client end ([`MemoryTransport`]) and the
//! server end ([`MemoryPeer`]). The peer pushes server frames, injects
//! transport failures, hangs up, and observes what the client sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use super::framing::Frame;
use super::transport::{AttachRequest, Connector, Transport, TransportError};

type Inbound = Result<Vec<u8>, TransportError>;

/// Client end of an in-memory duplex pair.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: UnboundedReceiver<Inbound>,
    outbound: UnboundedSender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

/// Server end of an in-memory duplex pair.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: Option<UnboundedSender<Inbound>>,
    from_client: UnboundedReceiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

/// Create a connected client/server pair.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MemoryTransport {
            inbound,
            outbound,
            closed: Arc::clone(&closed),
        },
        MemoryPeer {
            to_client: Some(to_client),
            from_client,
            closed,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Io("transport already closed".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|e| TransportError::Io(format!("peer went away: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.inbound.close();
    }
}

impl MemoryPeer {
    /// Deliver a raw message to the client.
    ///
    /// Returns `false` if the peer has hung up or the client is gone.
    pub fn send_raw(&self, message: impl Into<Vec<u8>>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(message.into())).is_ok())
    }

    /// Deliver an encoded frame to the client.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_raw(frame.encode())
    }

    /// Make the client's next receive fail with `error`.
    pub fn inject_error(&self, error: TransportError) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Close the server side; the client sees end of stream after draining.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next message the client sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.try_recv().ok()
    }

    /// Next message the client sent, waiting for it.
    ///
    /// Returns `None` once the client end has been dropped.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// Every message the client has sent so far, decoded.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.try_recv())
            .filter_map(|message| Frame::decode(&message).ok())
            .collect()
    }

    /// Whether the client closed its end.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// [`Connector`] that hands out a single prepared [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryConnector {
    transport: Mutex<Option<MemoryTransport>>,
    refusal: Option<String>,
}

impl MemoryConnector {
    /// Connector whose first `connect` succeeds with `transport`.
    pub fn new(transport: MemoryTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            refusal: None,
        }
    }

    /// Connector whose handshake always fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            transport: Mutex::new(None),
            refusal: Some(reason.into()),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, request: &AttachRequest) -> Result<MemoryTransport, TransportError> {
        if let Some(reason) = &self.refusal {
            return Err(TransportError::Handshake(reason.clone()));
        }
        self.transport.lock().await.take().ok_or_else(|| {
            TransportError::Handshake(format!(
                "no transport left for instance {}",
                request.instance_id()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (mut client, mut peer) = memory_pair();
        assert!(peer.send_raw(b"\x01hi".to_vec()));
        assert_eq!(client.recv().await, Some(Ok(b"\x01hi".to_vec())));

        client.send(b"\x00x".to_vec()).await.unwrap();
        assert_eq!(peer.try_recv(), Some(b"\x00x".to_vec()));
        assert_eq!(peer.try_recv(), None);
    }

    #[tokio::test]
    async fn test_hang_up_ends_stream() {
        let (mut client, mut peer) = memory_pair();
        peer.send_raw(b"\x01last".to_vec());
        peer.hang_up();
        assert!(!peer.send_raw(b"\x01late".to_vec()));
        assert_eq!(client.recv().await, Some(Ok(b"\x01last".to_vec())));
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_observable_and_blocks_sends() {
        let (mut client, peer) = memory_pair();
        client.close().await;
        assert!(peer.client_closed());
        assert!(client.send(vec![0]).await.is_err());
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_injected_error_surfaces() {
        let (mut client, peer) = memory_pair();
        peer.inject_error(TransportError::Io("reset".into()));
        assert_eq!(
            client.recv().await,
            Some(Err(TransportError::Io("reset".into())))
        );
    }

    #[tokio::test]
    async fn test_connector_hands_out_once() {
        let (client, _peer) = memory_pair();
        let connector = MemoryConnector::new(client);
        let request = AttachRequest::new("http://localhost", "abc");
        assert!(connector.connect(&request).await.is_ok());
        assert!(matches!(
            connector.connect(&request).await,
            Err(TransportError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MemoryConnector::refusing("401 Unauthorized");
        let request = AttachRequest::new("http://localhost", "abc");
        assert_eq!(
            connector.connect(&request).await.unwrap_err(),
            TransportError::Handshake("401 Unauthorized".into())
        );
    }
}
