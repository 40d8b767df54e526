use rust_decimal::Decimal;
use thiserror::Error;

use crate::{CourseId, UserId};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The referenced user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The referenced course does not exist.
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),

    /// A user with this email is already registered.
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// A course with this code already exists.
    #[error("Course code already exists: {0}")]
    DuplicateCourseCode(String),

    /// The entry debits more than the customer's balance.
    #[error("Insufficient funds for user {user}: balance {balance}, required {required}")]
    InsufficientFunds {
        user: UserId,
        balance: Decimal,
        required: Decimal,
    },

    /// The customer already holds an effective payment for the course.
    #[error("Course {course} already paid by user {user}")]
    AlreadyPaid { user: UserId, course: CourseId },

    /// A stored row or a submitted entry is malformed.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerStoreError>;
