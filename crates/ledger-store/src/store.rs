use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    Course, CourseId, ExpiringRent, LedgerEntry, LedgerStoreError, PeriodReportRow, Result,
    Transaction, TransactionKind, TransactionQuery, TransactionView, User, UserId,
};

/// Core trait for ledger store implementations.
///
/// A ledger store owns users, the course catalog and the transaction log.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Registers a user. Fails with `DuplicateEmail` if the email is taken.
    async fn create_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Adds a course to the catalog. Fails with `DuplicateCourseCode` if the
    /// code is taken.
    async fn create_course(&self, course: Course) -> Result<Course>;

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>>;

    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>>;

    /// Lists the catalog ordered by course code.
    async fn list_courses(&self) -> Result<Vec<Course>>;

    /// Applies a ledger entry.
    ///
    /// Locks the customer's balance, evaluates the entry guard, inserts the
    /// transaction and moves the balance. Either all of it commits or none
    /// of it does; guard failures surface as `InsufficientFunds` or
    /// `AlreadyPaid`.
    ///
    /// Returns the stored transaction.
    async fn apply(&self, entry: LedgerEntry) -> Result<Transaction>;

    /// Counts PAYMENT transactions of `user` for `course`.
    ///
    /// With `active_at` set, only payments with `expires > active_at` count.
    async fn count_payments(
        &self,
        user: UserId,
        course: CourseId,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    /// Retrieves transactions matching a query, oldest first.
    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<TransactionView>>;

    /// Aggregates course transactions created in `[from, to)` per
    /// (email, course), ordered by email then course name.
    async fn period_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PeriodReportRow>>;

    /// Lists rent payments whose expiry falls in `(from, to]`, ordered by
    /// email then expiry.
    async fn expiring_rents(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpiringRent>>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Loads a user, failing with `UserNotFound` if absent.
    async fn require_user(&self, id: UserId) -> Result<User> {
        self.get_user(id)
            .await?
            .ok_or(LedgerStoreError::UserNotFound(id))
    }

    /// Current materialized balance of a user.
    async fn balance(&self, id: UserId) -> Result<Decimal> {
        Ok(self.require_user(id).await?.balance)
    }

    /// All transactions of a user, oldest first.
    async fn transactions_for(&self, id: UserId) -> Result<Vec<Transaction>> {
        let views = self
            .query_transactions(TransactionQuery::for_customer(id))
            .await?;
        Ok(views.into_iter().map(|view| view.transaction).collect())
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Validates the shape of an entry before it is applied.
pub fn validate_entry(entry: &LedgerEntry) -> Result<()> {
    let transaction = entry.transaction();

    if transaction.amount <= Decimal::ZERO {
        return Err(LedgerStoreError::InvalidData(format!(
            "transaction amount must be positive, got {}",
            transaction.amount
        )));
    }

    match transaction.kind {
        TransactionKind::Deposit => {
            if transaction.course.is_some() || transaction.expires.is_some() {
                return Err(LedgerStoreError::InvalidData(
                    "deposit cannot reference a course or expire".to_string(),
                ));
            }
        }
        TransactionKind::Payment => {
            if transaction.course.is_none() {
                return Err(LedgerStoreError::InvalidData(
                    "payment must reference a course".to_string(),
                ));
            }
            if let Some(expires) = transaction.expires
                && expires <= transaction.created
            {
                return Err(LedgerStoreError::InvalidData(
                    "payment expiry must be after its creation".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Evaluates the funds part of an entry guard against the locked balance.
pub fn check_funds(entry: &LedgerEntry, balance: Decimal) -> Result<()> {
    let delta = entry.balance_delta();
    if entry.guard().require_funds && balance + delta < Decimal::ZERO {
        return Err(LedgerStoreError::InsufficientFunds {
            user: entry.customer(),
            balance,
            required: -delta,
        });
    }
    Ok(())
}

/// Evaluates the duplicate purchase part of an entry guard.
pub fn check_not_paid(entry: &LedgerEntry, effective_payments: u64) -> Result<()> {
    if let Some(block) = entry.guard().block_if_paid
        && effective_payments > 0
    {
        return Err(LedgerStoreError::AlreadyPaid {
            user: entry.customer(),
            course: block.course,
        });
    }
    Ok(())
}
