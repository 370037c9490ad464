//! Execution error taxonomy.
//!
//! The split drives the order manager's retry policy: transient errors are
//! retried with backoff, permanent errors settle the order immediately.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Call exceeded its deadline; the operation may still have landed
    /// broker-side, reconciliation decides
    #[error("execution call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Broker throttled the request
    #[error("rate limited by broker")]
    RateLimited,

    /// Network/connection failure
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Intent failed basic validation before reaching the broker
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Broker does not trade this symbol
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Account cannot carry the position
    #[error("insufficient margin")]
    InsufficientMargin,

    /// Broker rejected the order for a business reason
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Cancel/lookup referenced an order the broker does not know
    #[error("unknown broker order id: {0}")]
    UnknownOrder(String),
}

impl ExecutionError {
    /// Transient failures feed the retry policy; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::Timeout { .. }
                | ExecutionError::RateLimited
                | ExecutionError::Connectivity(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExecutionError::Timeout { elapsed_ms: 500 }.is_transient());
        assert!(ExecutionError::RateLimited.is_transient());
        assert!(ExecutionError::Connectivity("reset".into()).is_transient());

        assert!(!ExecutionError::InvalidOrder("qty".into()).is_transient());
        assert!(!ExecutionError::UnknownSymbol("XXX".into()).is_transient());
        assert!(!ExecutionError::InsufficientMargin.is_transient());
        assert!(!ExecutionError::Rejected("margin call".into()).is_transient());
    }
}
