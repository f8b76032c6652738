//! Writes session events to the local terminal.
//!
//! Remote output is passed through untouched; the local terminal emulator
//! interprets it. Locally generated notices (connection state, log replay,
//! exit status) are drawn as highlighted lines that always start on a
//! fresh line.

use std::io::{self, Write};

use crossterm::{queue, terminal::SetTitle};

use super::session::{CloseReason, SessionEvent, SessionState};
use super::transport::TransportError;

const NOTICE_START: &str = "\x1b[43m\x1b[30m * ";
const NOTICE_END: &str = "   \x1b[0m\r\n";

/// Renders [`SessionEvent`]s into a byte sink.
#[derive(Debug)]
pub struct TerminalRenderer<W: Write> {
    out: W,
    instance_id: String,
    at_line_start: bool,
}

impl<W: Write> TerminalRenderer<W> {
    /// Create a renderer for `instance_id` writing to `out`.
    pub fn new(out: W, instance_id: impl Into<String>) -> Self {
        Self {
            out,
            instance_id: instance_id.into(),
            at_line_start: true,
        }
    }

    /// Render one event and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the sink fails.
    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::Output(data) => self.write_output(data)?,
            SessionEvent::LogReplay => self.notice("Instance is not running, dumping logs...")?,
            SessionEvent::LogTruncated => self.notice("The log is too long, truncated to 1MB.")?,
            SessionEvent::Exit(status) => {
                self.notice(&format!("Instance exited with code {}", status.code))?;
                if status.is_error() {
                    self.notice(&status.message)?;
                }
            }
            SessionEvent::ConnectionChange(state) => self.render_state(state)?,
            SessionEvent::SizeIndicator(Some(geometry)) => {
                queue!(self.out, SetTitle(format!("{} {}", self.instance_id, geometry)))?;
            }
            SessionEvent::SizeIndicator(None) => {
                queue!(self.out, SetTitle(&self.instance_id))?;
            }
        }
        self.out.flush()
    }

    /// Write a highlighted notice line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the sink fails.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        if !self.at_line_start {
            self.out.write_all(b"\r\n")?;
        }
        write!(self.out, "{NOTICE_START}{text}{NOTICE_END}")?;
        self.at_line_start = true;
        Ok(())
    }

    /// Consume the renderer, returning the sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_output(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(&last) = data.last() else {
            return Ok(());
        };
        self.out.write_all(data)?;
        self.at_line_start = matches!(last, b'\n' | b'\r');
        Ok(())
    }

    fn render_state(&mut self, state: &SessionState) -> io::Result<()> {
        match state {
            SessionState::Connecting => {
                let text = format!("Connecting to instance {} ...", self.instance_id);
                self.notice(&text)
            }
            // Degraded is announced by the LogReplay event that follows it.
            SessionState::Open | SessionState::Degraded => Ok(()),
            SessionState::Closed(CloseReason::Normal) => self.notice("Connection closed."),
            SessionState::Closed(CloseReason::ExplicitDetach) => self.notice("Detached."),
            SessionState::Closed(CloseReason::TransportError(error)) => {
                if *error != TransportError::ClosedByRemote {
                    self.notice("Connection error occurred.")?;
                }
                self.notice("Connection closed.")
            }
        }
    }
}
