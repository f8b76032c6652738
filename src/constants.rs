//! Application-wide constants for toolset-attach.
//!
//! Centralizes protocol constants, timeouts and server paths so they are
//! discoverable in one place.
//!
//! # Categories
//!
//! - **Protocol**: Attach channel markers and caps
//! - **Timeouts**: Network and display timeouts
//! - **Server**: API paths and defaults
//! - **Input**: Local terminal handling

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Literal prefix of a log replay payload whose log was capped.
///
/// The remainder of the payload is the tail of the log, not the whole log.
pub const LOG_TRUNCATION_MARKER: &[u8] = b"truncated.";

/// Length of a resize frame on the wire: kind byte + two big-endian u16s.
pub const RESIZE_FRAME_LEN: usize = 5;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for REST calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the WebSocket close handshake when leaving a session.
pub const TRANSPORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the "current size" indicator stays visible after a resize.
pub const SIZE_INDICATOR_TTL: Duration = Duration::from_secs(2);

// ============================================================================
// Server
// ============================================================================

/// Default server URL when neither config nor environment provides one.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Path prefix of the toolset admin API.
pub const TOOLSET_API_PATH: &str = "/api/v1/admin/toolset";

/// Query parameter carrying the bearer credential on the attach handshake.
pub const AUTH_TOKEN_PARAM: &str = "auth_token";

/// Default page size for instance listings.
pub const DEFAULT_PAGE_TAKE: u32 = 10;

// ============================================================================
// Input
// ============================================================================

/// Byte that detaches the local terminal (`Ctrl-]`).
pub const DETACH_KEY: u8 = 0x1d;

/// Read buffer size for the stdin forwarding thread.
pub const STDIN_READ_BUFFER: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(HTTP_REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(HTTP_REQUEST_TIMEOUT <= Duration::from_secs(60));
        assert_eq!(SIZE_INDICATOR_TTL, Duration::from_secs(2));
        assert!(TRANSPORT_CLOSE_TIMEOUT <= HTTP_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_truncation_marker_is_ascii() {
        assert!(LOG_TRUNCATION_MARKER.is_ascii());
        assert_eq!(LOG_TRUNCATION_MARKER.len(), 10);
    }

    #[test]
    fn test_detach_key_is_not_printable() {
        assert!(DETACH_KEY.is_ascii_control());
    }
}
