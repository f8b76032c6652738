//! End-to-end attach scenarios over the in-memory transport.

use toolset_attach::attach::memory::{memory_pair, MemoryConnector};
use toolset_attach::attach::{
    AttachRequest, AttachSession, CloseReason, ExitStatus, Frame, Geometry, OutputChannel,
    SessionEvent, SessionEvents, SessionHandle, SessionState, TerminalRenderer, TransportError,
};

fn drain(events: &mut SessionEvents) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_attach_type_exit_scenario() {
    let (transport, mut peer) = memory_pair();
    let connector = MemoryConnector::new(transport);
    let request = AttachRequest::new("http://localhost:8080", "abc123");

    let (mut session, mut events) =
        AttachSession::attach(&connector, &request, Geometry::new(80, 24)).await;

    // First frame on the wire is the geometry announcement.
    assert_eq!(peer.recv().await, Some(vec![0x07, 0x00, 0x50, 0x00, 0x18]));

    session.send_input(b"ls\r").await;
    assert_eq!(peer.recv().await, Some(vec![0x00, b'l', b's', b'\r']));

    peer.send_frame(&Frame::Output {
        channel: OutputChannel::Primary,
        data: b"file1\r\n".to_vec(),
    });
    peer.send_raw(vec![0x06, 0x00, 0x00, 0x00, 0x00]);

    let (_handle, commands) = SessionHandle::channel();
    session.run(commands).await;

    assert_eq!(session.state(), &SessionState::Closed(CloseReason::Normal));
    assert!(peer.client_closed());
    assert_eq!(
        session.last_exit(),
        Some(&ExitStatus {
            code: 0,
            message: String::new()
        })
    );

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            SessionEvent::ConnectionChange(SessionState::Connecting),
            SessionEvent::ConnectionChange(SessionState::Open),
            SessionEvent::SizeIndicator(Some(Geometry::new(80, 24))),
            SessionEvent::Output(b"file1\r\n".to_vec()),
            SessionEvent::Exit(ExitStatus {
                code: 0,
                message: String::new()
            }),
            SessionEvent::SizeIndicator(None),
            SessionEvent::ConnectionChange(SessionState::Closed(CloseReason::Normal)),
        ]
    );
}

#[tokio::test]
async fn test_finished_instance_log_replay_is_rendered() {
    let (transport, mut peer) = memory_pair();
    let connector = MemoryConnector::new(transport);
    let request = AttachRequest::new("http://localhost:8080", "old42");

    let (mut session, mut events) =
        AttachSession::attach(&connector, &request, Geometry::new(100, 30)).await;

    // The server replays the log and then hangs up.
    peer.send_raw(b"\x09truncated.last line\r\n".to_vec());
    peer.hang_up();

    let (_handle, commands) = SessionHandle::channel();
    session.run(commands).await;

    assert_eq!(
        session.state(),
        &SessionState::Closed(CloseReason::TransportError(TransportError::ClosedByRemote))
    );

    let mut renderer = TerminalRenderer::new(Vec::new(), "old42");
    for event in drain(&mut events) {
        renderer.render(&event).unwrap();
    }
    let screen = String::from_utf8(renderer.into_inner()).unwrap();

    let connecting = screen.find("Connecting to instance old42 ...").unwrap();
    let replay = screen.find("Instance is not running, dumping logs...").unwrap();
    let truncated = screen.find("The log is too long, truncated to 1MB.").unwrap();
    let body = screen.find("last line\r\n").unwrap();
    let closed = screen.find("Connection closed.").unwrap();
    assert!(connecting < replay && replay < truncated && truncated < body && body < closed);
    assert!(!screen.contains("Connection error occurred."));
    assert!(!screen.contains("truncated.last"));
}

#[tokio::test]
async fn test_reattach_uses_fresh_session_and_current_geometry() {
    let (first, first_peer) = memory_pair();
    let request = AttachRequest::new("http://localhost:8080", "abc123");
    let (mut session, _events) =
        AttachSession::attach(&MemoryConnector::new(first), &request, Geometry::new(80, 24)).await;

    session.send_resize(120, 40).await;
    drop(first_peer);
    let (_handle, commands) = SessionHandle::channel();
    session.run(commands).await;
    assert!(session.state().is_closed());

    // Closed sessions never reconnect; attach again with the last geometry.
    let (second, mut second_peer) = memory_pair();
    let (again, _events) = AttachSession::attach(
        &MemoryConnector::new(second),
        &request,
        session.geometry(),
    )
    .await;

    assert_eq!(again.state(), &SessionState::Open);
    assert_eq!(second_peer.drain_frames(), vec![Frame::resize(120, 40)]);
}
