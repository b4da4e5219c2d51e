use thiserror::Error;
use uuid::Uuid;

use crate::OrderStatus;

/// Coarse classification of an [`EngineError`], used by boundary layers to
/// decide between client-correctable responses and server-side retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input; fix the request before retrying.
    Validation,
    /// The referenced product, order, or reservation does not exist.
    NotFound,
    /// The request was well-formed but the current state forbids it.
    State,
    /// Lost a race with another writer; safe to retry.
    Concurrency,
    /// The backing store failed.
    Persistence,
}

impl ErrorKind {
    /// Retry policy hint: only concurrency and persistence failures are worth
    /// a server-side retry; the rest will fail identically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Concurrency | ErrorKind::Persistence)
    }
}

/// Every failure the engine surfaces to its callers.
///
/// Operations that mutate multiple rows run inside one transaction; returning
/// any of these rolls the transaction back in full.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("product {product_id} ({name}) is not purchasable")]
    ProductInactive { product_id: Uuid, name: String },

    #[error(
        "insufficient stock for product {product_id} ({name}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: Uuid,
        name: String,
        requested: i32,
        available: i32,
    },

    /// The guarded decrement found less stock than the row lock promised.
    /// Only reachable if the store weakens the lock contract; treated as a
    /// race and therefore retryable.
    #[error("stock for product {0} was depleted by a concurrent checkout")]
    StockDepleted(Uuid),

    #[error("invalid order status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("reservation {0} is no longer active")]
    ReservationNotActive(Uuid),

    #[error("timed out waiting for a row lock")]
    LockTimeout,

    #[error("order {order_id} carries a malformed status {value:?}")]
    CorruptOrderRow { order_id: Uuid, value: String },

    #[error("connection pool failure: {0}")]
    Pool(String),

    #[error("storage failure: {0}")]
    Storage(diesel::result::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::ProductNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::ReservationNotFound(_) => ErrorKind::NotFound,
            EngineError::ProductInactive { .. }
            | EngineError::InsufficientStock { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::ReservationNotActive(_) => ErrorKind::State,
            EngineError::StockDepleted(_) | EngineError::LockTimeout => ErrorKind::Concurrency,
            EngineError::CorruptOrderRow { .. }
            | EngineError::Pool(_)
            | EngineError::Storage(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Wrap a pool checkout failure.
    pub fn pool(err: impl std::fmt::Display) -> Self {
        EngineError::Pool(err.to_string())
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match &err {
            // Postgres reports a `lock_timeout` expiry as an opaque database
            // error; surface it as the bounded-wait failure callers retry on.
            Error::DatabaseError(DatabaseErrorKind::Unknown, info)
                if info.message().contains("lock timeout") =>
            {
                EngineError::LockTimeout
            }
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                EngineError::LockTimeout
            }
            _ => EngineError::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let product = Uuid::new_v4();
        assert_eq!(
            EngineError::Validation("empty item list".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EngineError::ProductNotFound(product).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::InsufficientStock {
                product_id: product,
                name: "wooden train".into(),
                requested: 3,
                available: 1,
            }
            .kind(),
            ErrorKind::State
        );
        assert_eq!(
            EngineError::InvalidTransition {
                from: OrderStatus::Delivered,
                to: OrderStatus::Shipped,
            }
            .kind(),
            ErrorKind::State
        );
        assert_eq!(
            EngineError::StockDepleted(product).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(EngineError::LockTimeout.kind(), ErrorKind::Concurrency);
        assert_eq!(
            EngineError::Pool("worker pool closed".into()).kind(),
            ErrorKind::Persistence
        );
    }

    #[test]
    fn retry_hint_splits_terminal_from_transient() {
        assert!(EngineError::LockTimeout.is_retryable());
        assert!(EngineError::StockDepleted(Uuid::new_v4()).is_retryable());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
        assert!(!EngineError::ReservationNotActive(Uuid::new_v4()).is_retryable());
        assert!(!EngineError::OrderNotFound(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn insufficient_stock_names_the_product() {
        let product_id = Uuid::new_v4();
        let err = EngineError::InsufficientStock {
            product_id,
            name: "marble run".into(),
            requested: 5,
            available: 2,
        };
        let message = err.to_string();
        assert!(message.contains("marble run"));
        assert!(message.contains(&product_id.to_string()));
        assert!(message.contains("requested 5"));
    }
}
