use curvestream_integration::error::StreamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for the ingestion core.
///
/// Propagation policy: upstream and transient DB errors are recovered locally by the component
/// that owns them; parser errors never propagate past [`crate::parser`]; only
/// [`CoreError::ConfigInvalid`] and [`CoreError::DbFatal`] are expected to terminate the process.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to connect to upstream: {0}")]
    UpstreamConnect(#[from] StreamError),

    #[error("upstream rate limited the connection, backing off: {0}")]
    UpstreamRateLimited(String),

    #[error("upstream rejected the connection (auth/connection-limit): {0}")]
    UpstreamFatalAuth(String),

    #[error("received malformed frame, dropping: {0}")]
    ParseMalformed(String),

    #[error("transient database error, will retry flush: {0}")]
    DbTransient(String),

    #[error("fatal database error, halting writer: {0}")]
    DbFatal(String),

    #[error("invariant violation: {0}")]
    LogicalInvariantViolation(String),
}

impl CoreError {
    /// Whether this error should terminate the process rather than be recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::ConfigInvalid(_) | CoreError::DbFatal(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                CoreError::DbTransient(err.to_string())
            }
            _ => CoreError::DbFatal(err.to_string()),
        }
    }
}

/// Outcome of a single trade-handling attempt, expressed as an explicit result value rather
/// than relying on error propagation for routine skip cases.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum HandleOutcome {
    Saved,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum SkipReason {
    BelowSaveThreshold,
    DuplicateSignature,
    StaleSlot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_and_fatal_db_errors_are_fatal() {
        assert!(CoreError::ConfigInvalid("x".into()).is_fatal());
        assert!(CoreError::DbFatal("x".into()).is_fatal());
        assert!(!CoreError::DbTransient("x".into()).is_fatal());
        assert!(!CoreError::ParseMalformed("x".into()).is_fatal());
        assert!(!CoreError::UpstreamRateLimited("x".into()).is_fatal());
    }
}
