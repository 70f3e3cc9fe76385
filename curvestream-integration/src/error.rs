use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Implemented by errors that can classify themselves as unrecoverable, ie/ a caller holding
/// this error should stop retrying rather than loop forever.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

/// Low level errors generated while driving an upstream connection or internal channel.
///
/// This is the shared error vocabulary of the plumbing crate - component-specific errors
/// (parsing, persistence, ...) live in `curvestream-core` and wrap these via `#[from]`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum StreamError {
    #[error("failed to connect to upstream: {0}")]
    Connect(String),

    #[error("upstream closed the connection prematurely")]
    PrematureClose,

    #[error("failed to write subscription request: {0}")]
    Subscribe(String),

    #[error("upstream rate limited the connection: {0}")]
    RateLimited(String),

    #[error("upstream rejected the connection for auth/connection-limit reasons: {0}")]
    FatalAuth(String),

    #[error("sink is closed")]
    Sink,

    #[error("received malformed frame: {0}")]
    MalformedFrame(String),
}

impl Unrecoverable for StreamError {
    fn is_unrecoverable(&self) -> bool {
        matches!(self, StreamError::FatalAuth(_))
    }
}

/// Classify a raw upstream error message into the reconnect-policy buckets described by the
/// stream manager's error-class overrides (resource exhaustion vs hard auth/connection limits).
pub fn classify_upstream_message(message: &str) -> UpstreamErrorClass {
    let lower = message.to_ascii_lowercase();

    if lower.contains("resource_exhausted") || lower.contains("resource exhausted") || lower.contains("max subscriptions") {
        UpstreamErrorClass::RateLimited
    } else if lower.contains("permission denied") || lower.contains("connection limit") || lower.contains("unauthenticated") {
        UpstreamErrorClass::FatalAuth
    } else if lower.contains("premature close") {
        UpstreamErrorClass::PrematureClose
    } else {
        UpstreamErrorClass::Transient
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpstreamErrorClass {
    Transient,
    RateLimited,
    FatalAuth,
    PrematureClose,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_resource_exhausted() {
        assert_eq!(
            classify_upstream_message("Status { code: ResourceExhausted, message: \"RESOURCE_EXHAUSTED: max subscriptions\" }"),
            UpstreamErrorClass::RateLimited
        );
    }

    #[test]
    fn classifies_permission_denied() {
        assert_eq!(
            classify_upstream_message("rpc error: code = PermissionDenied desc = connection limit reached"),
            UpstreamErrorClass::FatalAuth
        );
    }

    #[test]
    fn classifies_premature_close() {
        assert_eq!(
            classify_upstream_message("error reading a body from connection: premature close"),
            UpstreamErrorClass::PrematureClose
        );
    }

    #[test]
    fn classifies_everything_else_as_transient() {
        assert_eq!(classify_upstream_message("connection reset by peer"), UpstreamErrorClass::Transient);
    }
}
