//! Client-side attachment session.
//!
//! An [`AttachSession`] owns one transport connection to one remote
//! instance. It turns inbound frames into [`SessionEvent`]s on an unbounded
//! channel and accepts input and resize requests either directly (the step
//! methods) or as [`SessionCommand`]s through [`AttachSession::run`].
//!
//! # State machine
//!
//! ```text
//! Connecting ──handshake ok──► Open ──log replay──► Degraded
//!     │                         │                       │
//!     │ handshake failed        │ exit / error / detach │
//!     ▼                         ▼                       ▼
//!                     Closed(reason)  (terminal)
//! ```
//!
//! A closed session never reconnects; attach again with a new session and
//! the current geometry.
//!
//! # Ordering
//!
//! Inbound messages are handled strictly in arrival order, one at a time.
//! All methods take `&mut self`, so the session is driven from a single
//! sequential context.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use super::framing::Frame;
use super::transport::{AttachRequest, Connector, Transport, TransportError};
use crate::constants::SIZE_INDICATOR_TTL;

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl Geometry {
    /// Create a geometry of `cols` x `rows`.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote process exited and the session closed the transport.
    Normal,
    /// The connection failed, dropped, or was closed by the remote.
    TransportError(TransportError),
    /// The caller detached.
    ExplicitDetach,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in flight.
    Connecting,
    /// Attached to a live process.
    Open,
    /// The remote is replaying a finished process's log instead of live output.
    Degraded,
    /// Terminal state.
    Closed(CloseReason),
}

impl SessionState {
    /// Returns `true` for [`SessionState::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Degraded => write!(f, "degraded"),
            Self::Closed(CloseReason::Normal) => write!(f, "closed (process exited)"),
            Self::Closed(CloseReason::TransportError(e)) => write!(f, "closed ({e})"),
            Self::Closed(CloseReason::ExplicitDetach) => write!(f, "closed (detached)"),
        }
    }
}

/// Exit notification from the remote process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process return code.
    pub code: i32,
    /// Auxiliary error message; empty when the process exited cleanly.
    pub message: String,
}

impl ExitStatus {
    /// Whether the exit carried an error message.
    pub fn is_error(&self) -> bool {
        !self.message.is_empty()
    }

    /// Zero return code and no error message.
    pub fn success(&self) -> bool {
        self.code == 0 && !self.is_error()
    }
}

/// Events a session delivers to its consumer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes to render, verbatim.
    Output(Vec<u8>),
    /// The remote switched to replaying the log of a finished process.
    LogReplay,
    /// The replayed log was capped to its tail.
    LogTruncated,
    /// The remote process exited.
    Exit(ExitStatus),
    /// The session changed state.
    ConnectionChange(SessionState),
    /// The "current size" indicator changed; `None` when it clears.
    SizeIndicator(Option<Geometry>),
}

/// Receiving end of a session's event stream.
pub type SessionEvents = UnboundedReceiver<SessionEvent>;

/// Requests a caller can queue for [`AttachSession::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Forward bytes to the remote's standard input.
    Input(Vec<u8>),
    /// Announce a new terminal geometry.
    Resize(Geometry),
    /// Close the session.
    Detach,
}

/// Cloneable sender for [`SessionCommand`]s.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Create a handle and the receiver to pass to [`AttachSession::run`].
    pub fn channel() -> (Self, UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue input bytes. Returns `false` once the session has stopped.
    pub fn input(&self, data: impl Into<Vec<u8>>) -> bool {
        self.tx.send(SessionCommand::Input(data.into())).is_ok()
    }

    /// Queue a resize. Returns `false` once the session has stopped.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        self.tx
            .send(SessionCommand::Resize(Geometry::new(cols, rows)))
            .is_ok()
    }

    /// Queue a detach. Returns `false` once the session has stopped.
    pub fn detach(&self) -> bool {
        self.tx.send(SessionCommand::Detach).is_ok()
    }
}

/// Short-lived display of the last announced geometry.
#[derive(Debug, Default)]
struct SizeIndicator {
    shown: Option<(Geometry, Instant)>,
}

impl SizeIndicator {
    fn show(&mut self, geometry: Geometry, now: Instant) {
        self.shown = Some((geometry, now + SIZE_INDICATOR_TTL));
    }

    fn current(&self, now: Instant) -> Option<Geometry> {
        self.shown
            .filter(|&(_, expires)| now < expires)
            .map(|(geometry, _)| geometry)
    }

    fn deadline(&self) -> Option<Instant> {
        self.shown.map(|(_, expires)| expires)
    }

    /// Clears the indicator if its window has elapsed.
    fn expire(&mut self, now: Instant) -> bool {
        match self.shown {
            Some((_, expires)) if now >= expires => {
                self.shown = None;
                true
            }
            _ => false,
        }
    }

    fn clear(&mut self) -> bool {
        self.shown.take().is_some()
    }
}

/// One attachment to one remote process instance.
pub struct AttachSession<T: Transport> {
    instance_id: String,
    state: SessionState,
    geometry: Geometry,
    last_exit: Option<ExitStatus>,
    size_indicator: SizeIndicator,
    transport: Option<T>,
    events: UnboundedSender<SessionEvent>,
}

impl<T: Transport> std::fmt::Debug for AttachSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachSession")
            .field("instance_id", &self.instance_id)
            .field("state", &self.state)
            .field("geometry", &self.geometry)
            .field("last_exit", &self.last_exit)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> AttachSession<T> {
    /// Attach to the instance named by `request`.
    ///
    /// The session starts in [`SessionState::Connecting`] and performs the
    /// handshake before returning. On success it is [`SessionState::Open`]
    /// and has already announced `geometry`; on failure it is
    /// `Closed(TransportError)`. Either way the returned receiver carries
    /// every event from the first `ConnectionChange(Connecting)` on.
    pub async fn attach<C>(
        connector: &C,
        request: &AttachRequest,
        geometry: Geometry,
    ) -> (Self, SessionEvents)
    where
        C: Connector<Transport = T>,
    {
        let (events, events_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            instance_id: request.instance_id().to_string(),
            state: SessionState::Connecting,
            geometry,
            last_exit: None,
            size_indicator: SizeIndicator::default(),
            transport: None,
            events,
        };
        session.emit(SessionEvent::ConnectionChange(SessionState::Connecting));

        match connector.connect(request).await {
            Ok(transport) => session.on_open(transport).await,
            Err(e) => {
                log::warn!("[Attach] Could not attach to {}: {}", session.instance_id, e);
                session.shutdown(CloseReason::TransportError(e)).await;
            }
        }

        (session, events_rx)
    }

    /// The attached instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last announced geometry.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// The exit notification, once one has arrived.
    pub fn last_exit(&self) -> Option<&ExitStatus> {
        self.last_exit.as_ref()
    }

    /// The geometry to display as "current size", while its window lasts.
    pub fn size_indicator(&self) -> Option<Geometry> {
        self.size_indicator.current(Instant::now())
    }

    /// Forward bytes to the remote's standard input.
    ///
    /// A no-op unless the session is [`SessionState::Open`].
    pub async fn send_input(&mut self, data: &[u8]) {
        if self.state != SessionState::Open {
            log::trace!(
                "[Attach] Dropping {} input bytes in state {}",
                data.len(),
                self.state
            );
            return;
        }
        self.transmit(&Frame::input(data)).await;
    }

    /// Announce a new geometry.
    ///
    /// Always sends a frame while [`SessionState::Open`], even if the
    /// geometry is unchanged. Updates the size indicator unless closed.
    pub async fn send_resize(&mut self, cols: u16, rows: u16) {
        if self.state.is_closed() {
            return;
        }
        let geometry = Geometry::new(cols, rows);
        self.geometry = geometry;
        self.size_indicator.show(geometry, Instant::now());
        self.emit(SessionEvent::SizeIndicator(Some(geometry)));

        if self.state == SessionState::Open {
            log::debug!("[Attach] Resize {} -> {}", self.instance_id, geometry);
            self.transmit(&Frame::resize(cols, rows)).await;
        }
    }

    /// Close the transport and end the session. A no-op once closed.
    pub async fn detach(&mut self) {
        if self.state.is_closed() {
            return;
        }
        log::info!("[Attach] Detaching from {}", self.instance_id);
        self.shutdown(CloseReason::ExplicitDetach).await;
    }

    /// Decode and dispatch one inbound transport message.
    pub async fn handle_message(&mut self, message: &[u8]) {
        if self.state.is_closed() {
            return;
        }
        match Frame::decode(message) {
            Ok(frame) => self.dispatch(frame).await,
            Err(e) => log::warn!("[Attach] Dropping frame from {}: {}", self.instance_id, e),
        }
    }

    /// Drive the session until it closes.
    ///
    /// Multiplexes inbound messages, `commands`, and the size-indicator
    /// timer. Dropping every [`SessionHandle`] counts as a detach.
    pub async fn run(&mut self, mut commands: UnboundedReceiver<SessionCommand>) {
        while !self.state.is_closed() {
            let deadline = self.size_indicator.deadline();
            tokio::select! {
                inbound = next_inbound(&mut self.transport) => match inbound {
                    Some(Ok(message)) => self.handle_message(&message).await,
                    Some(Err(e)) => {
                        log::warn!("[Attach] Connection to {} failed: {}", self.instance_id, e);
                        self.shutdown(CloseReason::TransportError(e)).await;
                    }
                    None => {
                        log::info!("[Attach] {} closed the connection", self.instance_id);
                        self.shutdown(CloseReason::TransportError(TransportError::ClosedByRemote))
                            .await;
                    }
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Input(data)) => self.send_input(&data).await,
                    Some(SessionCommand::Resize(g)) => self.send_resize(g.cols, g.rows).await,
                    Some(SessionCommand::Detach) | None => self.detach().await,
                },
                () = sleep_until_deadline(deadline) => self.expire_size_indicator(),
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Output { data, .. } => self.emit(SessionEvent::Output(data)),
            Frame::LogReplay { truncated, data } => {
                if self.state == SessionState::Open {
                    log::info!("[Attach] {} is not running, replaying log", self.instance_id);
                    self.set_state(SessionState::Degraded);
                }
                self.emit(SessionEvent::LogReplay);
                if truncated {
                    self.emit(SessionEvent::LogTruncated);
                }
                self.emit(SessionEvent::Output(data));
            }
            Frame::Exit { code, message } => {
                self.on_exit(ExitStatus { code, message }).await;
            }
            Frame::Unknown { kind, data } => {
                log::debug!(
                    "[Attach] Ignoring unknown frame kind 0x{:02x} ({} bytes)",
                    kind,
                    data.len()
                );
            }
            Frame::Input(_) | Frame::Resize { .. } => {
                log::debug!("[Attach] Ignoring client-bound frame sent by {}", self.instance_id);
            }
        }
    }

    async fn on_open(&mut self, transport: T) {
        self.transport = Some(transport);
        self.set_state(SessionState::Open);
        log::info!("[Attach] Attached to {}", self.instance_id);

        // The remote keeps no geometry across connections.
        let Geometry { cols, rows } = self.geometry;
        self.send_resize(cols, rows).await;
    }

    async fn on_exit(&mut self, status: ExitStatus) {
        log::info!(
            "[Attach] {} exited with code {}{}",
            self.instance_id,
            status.code,
            if status.is_error() { format!(": {}", status.message) } else { String::new() }
        );
        self.state = SessionState::Closed(CloseReason::Normal);
        self.last_exit = Some(status.clone());
        self.emit(SessionEvent::Exit(status));
        self.shutdown(CloseReason::Normal).await;
    }

    fn expire_size_indicator(&mut self) {
        if self.size_indicator.expire(Instant::now()) {
            self.emit(SessionEvent::SizeIndicator(None));
        }
    }

    async fn transmit(&mut self, frame: &Frame) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.send(frame.encode()).await {
            log::warn!("[Attach] Send to {} failed: {}", self.instance_id, e);
            self.shutdown(CloseReason::TransportError(e)).await;
        }
    }

    /// Release the transport and enter `Closed(reason)`.
    async fn shutdown(&mut self, reason: CloseReason) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        if self.size_indicator.clear() {
            self.emit(SessionEvent::SizeIndicator(None));
        }
        let state = SessionState::Closed(reason);
        self.state = state.clone();
        self.emit(SessionEvent::ConnectionChange(state));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state.clone();
            self.emit(SessionEvent::ConnectionChange(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The consumer may have gone away; the session keeps its own state.
        let _ = self.events.send(event);
    }
}

async fn next_inbound<T: Transport>(
    transport: &mut Option<T>,
) -> Option<Result<Vec<u8>, TransportError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
