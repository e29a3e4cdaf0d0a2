use thiserror::Error;

use dealerflow_core::{DomainError, OrderId};
use dealerflow_orders::StoreError;

/// Errors that fail an assignment run as a whole.
///
/// Per-line problems (lookup failures, no stock) never surface here; they are
/// recorded on the line and the run carries on.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order store error: {0}")]
    Store(#[from] StoreError),

    #[error("order rejected update: {0}")]
    Domain(#[from] DomainError),
}

impl AssignmentError {
    /// Whether running the same job again could possibly succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            AssignmentError::OrderNotFound(_) | AssignmentError::Domain(_) => true,
            AssignmentError::Store(_) => false,
        }
    }
}
