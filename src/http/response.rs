//! Canned responses the proxy writes on its own behalf.
//!
//! These are status lines only: no headers beyond what is needed for the
//! client to delimit the message.

/// Sent when a request could not be processed.
pub const INTERNAL_SERVER_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\r\n";

/// Sent when the upstream serving a request failed before answering.
pub const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n";
