use chrono::{DateTime, Utc};

use crate::{TransactionKind, UserId};

/// Builder for filtered transaction listings.
///
/// Results are always ordered by creation time, oldest first.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// Filter by customer.
    pub customer: Option<UserId>,

    /// Filter by transaction kind.
    pub kind: Option<TransactionKind>,

    /// Filter by the code of the joined course.
    pub course_code: Option<String>,

    /// Keep only rows with no expiry or `expires >= unexpired_at`.
    pub unexpired_at: Option<DateTime<Utc>>,

    /// Filter to rows created at or after this timestamp.
    pub created_from: Option<DateTime<Utc>>,

    /// Filter to rows created at or before this timestamp.
    pub created_to: Option<DateTime<Utc>>,

    /// Maximum number of rows to return.
    pub limit: Option<usize>,

    /// Number of rows to skip.
    pub offset: Option<usize>,
}

impl TransactionQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one customer's transactions.
    pub fn for_customer(customer: UserId) -> Self {
        Self {
            customer: Some(customer),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn course_code(mut self, code: impl Into<String>) -> Self {
        self.course_code = Some(code.into());
        self
    }

    /// Drops transactions that expired before `at`.
    pub fn unexpired_at(mut self, at: DateTime<Utc>) -> Self {
        self.unexpired_at = Some(at);
        self
    }

    pub fn created_from(mut self, from: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self
    }

    pub fn created_to(mut self, to: DateTime<Utc>) -> Self {
        self.created_to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}
