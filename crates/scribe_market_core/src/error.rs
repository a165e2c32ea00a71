//! crates/scribe_market_core/src/error.rs
//!
//! The error taxonomy every workflow operation reports in.

use uuid::Uuid;

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    /// Malformed, missing or out-of-range input. Nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The document is not in the state the operation needs (already claimed, duplicate request).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request {0} has expired")]
    Expired(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The acting principal may not perform this operation.
    #[error("Not permitted: {0}")]
    Authorization(String),

    #[error("Store error: {0}")]
    Port(PortError),
}

pub type MarketResult<T> = Result<T, MarketError>;

impl From<PortError> for MarketError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => MarketError::NotFound(what),
            PortError::Conflict(what) => MarketError::Conflict(what),
            PortError::LimitReached(what) => MarketError::Validation(what),
            PortError::Unauthorized => MarketError::Authorization("unauthorized".to_string()),
            other @ PortError::Unexpected(_) => MarketError::Port(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhaustion_surfaces_as_validation() {
        let err: MarketError = PortError::LimitReached("5 active assignments".into()).into();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn store_failures_stay_wrapped() {
        let err: MarketError = PortError::Unexpected("connection reset".into()).into();
        assert!(matches!(err, MarketError::Port(PortError::Unexpected(_))));
    }
}
