//! Read side of the ledger: filtered listings and report feeds.

use chrono::{DateTime, Duration, Utc};
use common::UserId;
use ledger_store::{
    Course, ExpiringRent, LedgerStore, PeriodReportRow, TransactionKind, TransactionQuery,
    TransactionView,
};

use crate::error::Result;
use crate::policy::PaymentPolicy;

/// Query facade over a [`LedgerStore`].
#[derive(Clone)]
pub struct TransactionRepository<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> TransactionRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Counts the user's effective payments for `course`.
    ///
    /// Rent payments only count while `expires > now`; buy payments count
    /// forever.
    #[tracing::instrument(skip(self, course), fields(course_code = %course.code))]
    pub async fn existing_payment(
        &self,
        course: &Course,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let active_at = PaymentPolicy::for_kind(course.kind).duplicate_window_at(now);
        Ok(self
            .store
            .count_payments(user_id, course.id, active_at)
            .await?)
    }

    /// Lists a user's transactions, oldest first.
    ///
    /// With `skip_expired`, rows whose `expires` is before `now` are dropped.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_filters(
        &self,
        user_id: UserId,
        kind: Option<TransactionKind>,
        course_code: Option<&str>,
        skip_expired: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionView>> {
        let mut query = TransactionQuery::for_customer(user_id);
        if let Some(kind) = kind {
            query = query.kind(kind);
        }
        if let Some(code) = course_code {
            query = query.course_code(code);
        }
        if skip_expired {
            query = query.unexpired_at(now);
        }

        let rows = self.store.query_transactions(query).await?;
        tracing::debug!(count = rows.len(), "transactions found");
        Ok(rows)
    }

    /// Per (email, course) totals of course transactions created in `[from, to)`.
    #[tracing::instrument(skip(self))]
    pub async fn period_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PeriodReportRow>> {
        Ok(self.store.period_report(from, to).await?)
    }

    /// Rents whose access ends in `(now, now + within]`.
    #[tracing::instrument(skip(self))]
    pub async fn expiring_rents(
        &self,
        now: DateTime<Utc>,
        within: Duration,
    ) -> Result<Vec<ExpiringRent>> {
        Ok(self.store.expiring_rents(now, now + within).await?)
    }
}
