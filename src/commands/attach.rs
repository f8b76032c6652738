//! `attach` command: connect the local terminal to a remote instance.
//!
//! The local terminal is put in raw mode for the duration of the session.
//! Keystrokes are forwarded verbatim until `Ctrl-]` detaches; window size
//! changes are forwarded as resizes.
//!
//! # Threads
//!
//! ```text
//! stdin thread ──SessionCommand::Input/Detach──┐
//!                                              ├──► AttachSession::run (tokio)
//! SIGWINCH thread ──SessionCommand::Resize─────┘            │
//!                                                    SessionEvent
//!                                                           ▼
//!                                              render task ──► stdout
//! ```

use std::io::{self, Read};
use std::thread;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::attach::{
    AttachRequest, AttachSession, CloseReason, ExitStatus, Geometry, SessionHandle, SessionState,
    TerminalRenderer, TransportError, WsConnector,
};
use crate::constants::{DETACH_KEY, STDIN_READ_BUFFER};
use crate::Config;

/// Fallback geometry when the terminal size cannot be queried.
const FALLBACK_GEOMETRY: Geometry = Geometry { cols: 80, rows: 24 };

/// Restores cooked mode on drop (including panics).
#[derive(Debug)]
pub struct TerminalGuard;

impl TerminalGuard {
    /// Enable raw mode; it is disabled again when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns an error if raw mode cannot be enabled.
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = crossterm::execute!(io::stdout(), crossterm::cursor::Show);
    }
}

/// Attach to `instance_id` and block until the session ends.
///
/// Returns the exit code the CLI should terminate with.
///
/// # Errors
///
/// Returns an error if the attach target is invalid or the terminal cannot
/// be prepared. Connection failures are reported inline and reflected in
/// the returned code.
pub fn run(config: &Config, instance_id: &str) -> Result<i32> {
    let request = config.attach_request(instance_id);
    // Reject bad targets before touching the terminal.
    request.url()?;

    let geometry = crossterm::terminal::size()
        .map(|(cols, rows)| Geometry::new(cols, rows))
        .unwrap_or(FALLBACK_GEOMETRY);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(attach(request, geometry))
}

async fn attach(request: AttachRequest, geometry: Geometry) -> Result<i32> {
    let instance_id = request.instance_id().to_string();
    let _guard = TerminalGuard::enable()?;

    let (mut session, mut events) =
        AttachSession::attach(&WsConnector, &request, geometry).await;

    let mut renderer = TerminalRenderer::new(io::stdout(), instance_id.as_str());
    let render_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = renderer.render(&event) {
                log::warn!("[Attach] Failed to render event: {}", e);
            }
        }
    });

    let (handle, commands) = SessionHandle::channel();
    spawn_stdin_forwarder(handle.clone())?;
    #[cfg(unix)]
    let winch = spawn_resize_watcher(handle)?;

    session.run(commands).await;

    #[cfg(unix)]
    winch.close();

    let code = exit_code(session.state(), session.last_exit());
    // Dropping the session ends the event stream and with it the render task.
    drop(session);
    if let Err(e) = render_task.await {
        log::warn!("[Attach] Render task failed: {}", e);
    }
    Ok(code)
}

/// Map how a session ended to a process exit code.
///
/// A non-zero remote return code is passed through; an exit that only
/// carried an error message, or a broken connection, yields 1.
pub fn exit_code(state: &SessionState, last_exit: Option<&ExitStatus>) -> i32 {
    match (last_exit, state) {
        (Some(exit), _) if exit.code != 0 => exit.code,
        (Some(exit), _) if exit.is_error() => 1,
        (Some(_), _) => 0,
        (None, SessionState::Closed(CloseReason::TransportError(e)))
            if *e != TransportError::ClosedByRemote =>
        {
            1
        }
        (None, _) => 0,
    }
}

/// Split a stdin chunk at the detach key.
///
/// Returns the bytes to forward and whether the detach key was seen.
pub fn split_at_detach(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.iter().position(|&b| b == DETACH_KEY) {
        Some(pos) => (&chunk[..pos], true),
        None => (chunk, false),
    }
}

fn spawn_stdin_forwarder(handle: SessionHandle) -> Result<()> {
    thread::Builder::new()
        .name("attach-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; STDIN_READ_BUFFER];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => {
                        handle.detach();
                        break;
                    }
                    Ok(n) => {
                        let (input, detach) = split_at_detach(&buf[..n]);
                        if !input.is_empty() && !handle.input(input) {
                            break;
                        }
                        if detach {
                            handle.detach();
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::warn!("[Attach] stdin read failed: {}", e);
                        handle.detach();
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin thread")?;
    Ok(())
}

#[cfg(unix)]
fn spawn_resize_watcher(handle: SessionHandle) -> Result<signal_hook::iterator::Handle> {
    use signal_hook::consts::signal::SIGWINCH;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGWINCH]).context("Failed to watch SIGWINCH")?;
    let signals_handle = signals.handle();
    thread::Builder::new()
        .name("attach-winch".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                match crossterm::terminal::size() {
                    Ok((cols, rows)) => {
                        if !handle.resize(cols, rows) {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[Attach] Could not read terminal size: {}", e),
                }
            }
        })
        .context("Failed to spawn SIGWINCH thread")?;
    Ok(signals_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_detach() {
        assert_eq!(split_at_detach(b"ls\r"), (&b"ls\r"[..], false));
        assert_eq!(split_at_detach(b"ab\x1dcd"), (&b"ab"[..], true));
        assert_eq!(split_at_detach(b"\x1d"), (&b""[..], true));
    }

    #[test]
    fn test_exit_code_mirrors_remote_code() {
        let closed = SessionState::Closed(CloseReason::Normal);
        let exit = ExitStatus { code: 42, message: "boom".into() };
        assert_eq!(exit_code(&closed, Some(&exit)), 42);

        let exit = ExitStatus { code: 0, message: "killed".into() };
        assert_eq!(exit_code(&closed, Some(&exit)), 1);

        let exit = ExitStatus { code: 0, message: String::new() };
        assert_eq!(exit_code(&closed, Some(&exit)), 0);
    }

    #[test]
    fn test_exit_code_without_exit_frame() {
        let detached = SessionState::Closed(CloseReason::ExplicitDetach);
        assert_eq!(exit_code(&detached, None), 0);

        let remote = SessionState::Closed(CloseReason::TransportError(TransportError::ClosedByRemote));
        assert_eq!(exit_code(&remote, None), 0);

        let failed = SessionState::Closed(CloseReason::TransportError(TransportError::Handshake(
            "404 Not Found".into(),
        )));
        assert_eq!(exit_code(&failed, None), 1);
    }
}
