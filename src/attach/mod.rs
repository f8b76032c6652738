//! Interactive attachment to remote process instances.
//!
//! # Modules
//!
//! - [`framing`] - Wire format for both directions
//! - [`transport`] - Transport traits and the WebSocket implementation
//! - [`memory`] - In-process transport pair
//! - [`session`] - Client session state machine
//! - [`render`] - Session events to terminal bytes

pub mod framing;
pub mod memory;
pub mod render;
pub mod session;
pub mod transport;

pub use framing::{Frame, MalformedFrame, OutputChannel};
pub use render::TerminalRenderer;
pub use session::{
    AttachSession, CloseReason, ExitStatus, Geometry, SessionCommand, SessionEvent, SessionEvents,
    SessionHandle, SessionState,
};
pub use transport::{
    AttachRequest, Connector, CredentialPlacement, Transport, TransportError, WsConnector,
    WsTransport,
};
