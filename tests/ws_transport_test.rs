//! Attach sessions against a real local WebSocket server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use toolset_attach::attach::{
    AttachRequest, AttachSession, CloseReason, CredentialPlacement, ExitStatus, Frame, Geometry,
    Connector, SessionEvent, SessionHandle, SessionState, Transport, TransportError, WsConnector,
};
use toolset_attach::constants::TRANSPORT_CLOSE_TIMEOUT;

#[derive(Debug, Default, Clone)]
struct Handshake {
    uri: String,
    authorization: Option<String>,
}

/// Accept one connection, send `outgoing`, and collect binary messages from
/// the client until it closes.
async fn spawn_server(
    outgoing: Vec<Vec<u8>>,
    reject: bool,
) -> (String, JoinHandle<(Handshake, Vec<Vec<u8>>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new(Handshake::default()));
        let seen_in_callback = Arc::clone(&seen);

        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen_in_callback.lock().unwrap() = Handshake {
                uri: req.uri().to_string(),
                authorization: req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            };
            if reject {
                let mut denied = ErrorResponse::new(Some("unauthorized".to_string()));
                *denied.status_mut() = StatusCode::UNAUTHORIZED;
                return Err(denied);
            }
            Ok(resp)
        };

        let mut received = Vec::new();
        if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
            let (mut sink, mut stream) = ws.split();
            for frame in outgoing {
                sink.send(Message::Binary(frame)).await.unwrap();
            }
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Binary(data) => received.push(data.to_vec()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        let handshake = seen.lock().unwrap().clone();
        (handshake, received)
    });

    (base_url, task)
}

#[tokio::test]
async fn test_query_parameter_credential_and_exit() {
    let exit = Frame::Exit {
        code: 42,
        message: "boom".to_string(),
    };
    let (base_url, server) = spawn_server(vec![exit.encode()], false).await;
    let request = AttachRequest::new(base_url, "abc123")
        .with_token("tok", CredentialPlacement::QueryParameter);

    let (mut session, mut events) =
        AttachSession::attach(&WsConnector, &request, Geometry::new(80, 24)).await;
    let (_handle, commands) = SessionHandle::channel();
    session.run(commands).await;

    assert_eq!(session.state(), &SessionState::Closed(CloseReason::Normal));
    assert_eq!(
        session.last_exit(),
        Some(&ExitStatus {
            code: 42,
            message: "boom".to_string()
        })
    );

    let (handshake, received) = server.await.unwrap();
    assert_eq!(
        handshake.uri,
        "/api/v1/admin/toolset/instances/abc123/attach?auth_token=Bearer+tok"
    );
    assert_eq!(handshake.authorization, None);
    assert_eq!(received, vec![vec![0x07, 0x00, 0x50, 0x00, 0x18]]);

    let mut saw_exit = false;
    while let Ok(event) = events.try_recv() {
        saw_exit |= matches!(event, SessionEvent::Exit(ExitStatus { code: 42, .. }));
    }
    assert!(saw_exit);
}

#[tokio::test]
async fn test_header_credential_input_and_detach() {
    let (base_url, server) = spawn_server(vec![b"\x01welcome\r\n".to_vec()], false).await;
    let request =
        AttachRequest::new(base_url, "abc123").with_token("tok", CredentialPlacement::Header);

    let (mut session, mut events) =
        AttachSession::attach(&WsConnector, &request, Geometry::new(132, 43)).await;
    assert_eq!(session.state(), &SessionState::Open);

    // Wait for the greeting so the input and detach follow it.
    let (handle, commands) = SessionHandle::channel();
    let driver = tokio::spawn(async move {
        session.run(commands).await;
        session
    });
    loop {
        match events.recv().await {
            Some(SessionEvent::Output(data)) => {
                assert_eq!(data, b"welcome\r\n");
                break;
            }
            Some(_) => {}
            None => panic!("session ended before output arrived"),
        }
    }
    handle.input(b"exit\r".to_vec());
    handle.detach();
    let session = driver.await.unwrap();

    assert_eq!(
        session.state(),
        &SessionState::Closed(CloseReason::ExplicitDetach)
    );

    let (handshake, received) = server.await.unwrap();
    assert_eq!(handshake.uri, "/api/v1/admin/toolset/instances/abc123/attach");
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer tok"));
    assert_eq!(
        received,
        vec![
            vec![0x07, 0x00, 0x84, 0x00, 0x2B],
            b"\x00exit\r".to_vec(),
        ]
    );
}

#[tokio::test]
async fn test_rejected_handshake_closes_session() {
    let (base_url, server) = spawn_server(Vec::new(), true).await;
    let request = AttachRequest::new(base_url, "abc123");

    let (session, _events) =
        AttachSession::attach(&WsConnector, &request, Geometry::new(80, 24)).await;

    assert!(matches!(
        session.state(),
        SessionState::Closed(CloseReason::TransportError(TransportError::Handshake(_)))
    ));
    let (_, received) = server.await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_close_is_bounded_when_peer_stops_reading() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Complete the upgrade, then never read again.
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = released.await;
        drop(ws);
    });

    let request = AttachRequest::new(base_url, "abc123");
    let mut transport = WsConnector.connect(&request).await.unwrap();

    // Fill the socket buffers until a send can no longer complete.
    let chunk = vec![0x00; 1024 * 1024];
    for _ in 0..256 {
        let sent =
            tokio::time::timeout(Duration::from_millis(200), transport.send(chunk.clone())).await;
        if sent.is_err() {
            break;
        }
    }

    let closed =
        tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT + Duration::from_secs(2), transport.close())
            .await;
    assert!(closed.is_ok(), "close did not return while the peer was stalled");
    assert!(transport.recv().await.is_none());

    let _ = release.send(());
    server.await.unwrap();
}
