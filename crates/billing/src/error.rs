//! Billing error types.

use common::{CourseId, UserId};
use ledger_store::LedgerStoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur during billing operations.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Deposit amount was zero or negative.
    #[error("Deposit amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    /// The customer does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// No course matches the requested code or id.
    #[error("Course not found: {0}")]
    CourseNotFound(String),

    /// A rent or buy course without a price cannot be sold.
    #[error("Course {0} has no price")]
    MissingPrice(String),

    /// Balance does not cover the course price.
    #[error("Not enough funds: balance {balance}, price {required}")]
    InsufficientFunds {
        user: UserId,
        balance: Decimal,
        required: Decimal,
    },

    /// The customer already holds an effective payment for the course.
    #[error("Course {course} is already paid")]
    AlreadyPaid { user: UserId, course: CourseId },

    /// The atomic unit failed in the store.
    #[error("Storage error: {0}")]
    Storage(LedgerStoreError),
}

impl BillingError {
    /// Only storage failures may be retried; rejections are deterministic
    /// until the ledger changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Storage(_))
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            BillingError::InvalidAmount(_) => "invalid_amount",
            BillingError::UserNotFound(_) => "user_not_found",
            BillingError::CourseNotFound(_) => "course_not_found",
            BillingError::MissingPrice(_) => "missing_price",
            BillingError::InsufficientFunds { .. } => "insufficient_funds",
            BillingError::AlreadyPaid { .. } => "already_paid",
            BillingError::Storage(_) => "storage",
        }
    }
}

impl From<LedgerStoreError> for BillingError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::UserNotFound(user) => BillingError::UserNotFound(user),
            LedgerStoreError::CourseNotFound(course) => {
                BillingError::CourseNotFound(course.to_string())
            }
            LedgerStoreError::InsufficientFunds {
                user,
                balance,
                required,
            } => BillingError::InsufficientFunds {
                user,
                balance,
                required,
            },
            LedgerStoreError::AlreadyPaid { user, course } => {
                BillingError::AlreadyPaid { user, course }
            }
            other => BillingError::Storage(other),
        }
    }
}

/// Convenience type alias for billing results.
pub type Result<T> = std::result::Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_failures_become_rejections() {
        let user = UserId::new();
        let course = CourseId::new();

        let err = BillingError::from(LedgerStoreError::AlreadyPaid { user, course });
        assert!(matches!(err, BillingError::AlreadyPaid { .. }));
        assert!(!err.is_retryable());

        let err = BillingError::from(LedgerStoreError::InsufficientFunds {
            user,
            balance: Decimal::ZERO,
            required: Decimal::ONE,
        });
        assert_eq!(err.reason(), "insufficient_funds");
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_failures_are_retryable() {
        let err = BillingError::from(LedgerStoreError::InvalidData("broken row".to_string()));
        assert!(matches!(err, BillingError::Storage(_)));
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "storage");
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            BillingError::InvalidAmount(Decimal::NEGATIVE_ONE).to_string(),
            "Deposit amount must be positive, got -1"
        );
        assert_eq!(
            BillingError::CourseNotFound("php_9".to_string()).to_string(),
            "Course not found: php_9"
        );
    }
}
