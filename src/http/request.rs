//! Correlation IDs for forwarded requests.
//!
//! # Responsibilities
//! - Generate the opaque token stamped on every request sent upstream
//! - Name the header the origin must echo back
//!
//! # Design Decisions
//! - UUID v4, so tokens never repeat across restarts
//! - Header name is lowercase, matching the parser's key normalization

use std::fmt;

use uuid::Uuid;

/// Header carrying the correlation ID between proxy and origin.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Correlation ID linking an upstream response to its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh, unique ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn echoed_value_matches() {
        let id = RequestId::new();
        assert_eq!(RequestId::from(id.as_str()), id);
    }
}
