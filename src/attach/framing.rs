//! Wire protocol codec for the attach channel.
//!
//! One frame per transport message, no length prefix:
//!
//! ```text
//! [u8 kind] [payload: rest of the message]
//! ```
//!
//! Frame kinds:
//! - `0x00`: Input (client→server): `[raw bytes]`
//! - `0x01`: Output (server→client): `[raw bytes]`
//! - `0x02`: Output, second stream (server→client): `[raw bytes]`
//! - `0x06`: Exit (server→client): `[i32 BE code][UTF-8 message]`
//! - `0x07`: Resize (client→server): `[u16 BE cols][u16 BE rows]`
//! - `0x09`: Log replay (server→client): `["truncated."]?[raw bytes]`
//!
//! Any other kind decodes to [`Frame::Unknown`] so newer servers can add
//! kinds without breaking older clients.

use thiserror::Error;

use crate::constants::{LOG_TRUNCATION_MARKER, RESIZE_FRAME_LEN};

/// Frame kind constants.
pub mod frame_kind {
    /// Keystrokes or pasted bytes (client → server).
    pub const INPUT: u8 = 0x00;
    /// Live process output (server → client).
    pub const OUTPUT: u8 = 0x01;
    /// Live process output on the second stream (server → client).
    pub const OUTPUT_SECONDARY: u8 = 0x02;
    /// Process exited (server → client).
    pub const EXIT: u8 = 0x06;
    /// Terminal resize (client → server).
    pub const RESIZE: u8 = 0x07;
    /// Historical log replay for a finished process (server → client).
    pub const LOG_REPLAY: u8 = 0x09;
}

/// Which of the two output kinds carried an output frame.
///
/// The server reserves two kinds for output; clients render both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    /// Kind `0x01`.
    Primary,
    /// Kind `0x02`.
    Secondary,
}

impl OutputChannel {
    fn kind(self) -> u8 {
        match self {
            Self::Primary => frame_kind::OUTPUT,
            Self::Secondary => frame_kind::OUTPUT_SECONDARY,
        }
    }
}

/// A decoded attach-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bytes for the remote process's standard input.
    Input(Vec<u8>),

    /// Terminal geometry announcement.
    Resize {
        /// Terminal width in columns.
        cols: u16,
        /// Terminal height in rows.
        rows: u16,
    },

    /// Live process output.
    Output {
        /// Which output kind the frame arrived on.
        channel: OutputChannel,
        /// Raw output bytes.
        data: Vec<u8>,
    },

    /// Log dump substituted for live output when the process is not running.
    LogReplay {
        /// Whether the log was capped to its tail.
        truncated: bool,
        /// Log bytes, with the truncation marker stripped.
        data: Vec<u8>,
    },

    /// Process exit notification.
    Exit {
        /// Process return code.
        code: i32,
        /// Auxiliary error message, empty when there is none.
        message: String,
    },

    /// A kind this client does not know about.
    Unknown {
        /// The discriminator byte.
        kind: u8,
        /// The undecoded payload.
        data: Vec<u8>,
    },
}

/// A message that could not be decoded into a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedFrame {
    /// The message carried no kind byte.
    #[error("malformed frame: empty message")]
    Empty,
    /// A fixed-layout frame had the wrong payload length.
    #[error("malformed frame: kind 0x{kind:02x} needs {expected} payload bytes, got {actual}")]
    BadLength {
        /// The discriminator byte.
        kind: u8,
        /// Payload length the layout requires.
        expected: usize,
        /// Payload length received.
        actual: usize,
    },
}

impl Frame {
    /// Wrap keystroke or pasted bytes for the remote's standard input.
    pub fn input(data: impl Into<Vec<u8>>) -> Self {
        Self::Input(data.into())
    }

    /// Build a resize frame.
    pub fn resize(cols: u16, rows: u16) -> Self {
        Self::Resize { cols, rows }
    }

    /// The discriminator byte this frame is sent with.
    pub fn kind(&self) -> u8 {
        match self {
            Frame::Input(_) => frame_kind::INPUT,
            Frame::Resize { .. } => frame_kind::RESIZE,
            Frame::Output { channel, .. } => channel.kind(),
            Frame::LogReplay { .. } => frame_kind::LOG_REPLAY,
            Frame::Exit { .. } => frame_kind::EXIT,
            Frame::Unknown { kind, .. } => *kind,
        }
    }

    /// Encode this frame into a single transport message.
    ///
    /// Returns `[u8 kind][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Input(data) | Frame::Output { data, .. } | Frame::Unknown { data, .. } => {
                encode_raw(self.kind(), data)
            }
            Frame::Resize { cols, rows } => {
                let mut buf = Vec::with_capacity(RESIZE_FRAME_LEN);
                buf.push(frame_kind::RESIZE);
                buf.extend_from_slice(&cols.to_be_bytes());
                buf.extend_from_slice(&rows.to_be_bytes());
                buf
            }
            Frame::LogReplay { truncated, data } => {
                let marker: &[u8] = if *truncated { LOG_TRUNCATION_MARKER } else { &[] };
                let mut buf = Vec::with_capacity(1 + marker.len() + data.len());
                buf.push(frame_kind::LOG_REPLAY);
                buf.extend_from_slice(marker);
                buf.extend_from_slice(data);
                buf
            }
            Frame::Exit { code, message } => {
                let mut buf = Vec::with_capacity(5 + message.len());
                buf.push(frame_kind::EXIT);
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
                buf
            }
        }
    }

    /// Decode one transport message.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame`] if the message is empty or a fixed-layout
    /// frame has the wrong length. Unrecognized kinds are not errors.
    pub fn decode(message: &[u8]) -> Result<Self, MalformedFrame> {
        let (&kind, payload) = message.split_first().ok_or(MalformedFrame::Empty)?;
        decode_frame(kind, payload)
    }
}

/// Encode a raw frame with kind byte and payload.
fn encode_raw(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind);
    buf.extend_from_slice(payload);
    buf
}

/// Decode a single frame from a kind byte and payload.
fn decode_frame(kind: u8, payload: &[u8]) -> Result<Frame, MalformedFrame> {
    match kind {
        frame_kind::INPUT => Ok(Frame::Input(payload.to_vec())),
        frame_kind::OUTPUT => Ok(Frame::Output {
            channel: OutputChannel::Primary,
            data: payload.to_vec(),
        }),
        frame_kind::OUTPUT_SECONDARY => Ok(Frame::Output {
            channel: OutputChannel::Secondary,
            data: payload.to_vec(),
        }),
        frame_kind::RESIZE => {
            let Ok([c0, c1, r0, r1]) = <[u8; 4]>::try_from(payload) else {
                return Err(MalformedFrame::BadLength {
                    kind,
                    expected: RESIZE_FRAME_LEN - 1,
                    actual: payload.len(),
                });
            };
            Ok(Frame::Resize {
                cols: u16::from_be_bytes([c0, c1]),
                rows: u16::from_be_bytes([r0, r1]),
            })
        }
        frame_kind::EXIT => {
            if payload.len() < 4 {
                return Err(MalformedFrame::BadLength {
                    kind,
                    expected: 4,
                    actual: payload.len(),
                });
            }
            let code = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let message = String::from_utf8_lossy(&payload[4..]).into_owned();
            Ok(Frame::Exit { code, message })
        }
        frame_kind::LOG_REPLAY => {
            let (truncated, data) = match payload.strip_prefix(LOG_TRUNCATION_MARKER) {
                Some(tail) => (true, tail),
                None => (false, payload),
            };
            Ok(Frame::LogReplay {
                truncated,
                data: data.to_vec(),
            })
        }
        _ => Ok(Frame::Unknown {
            kind,
            data: payload.to_vec(),
        }),
    }
}
