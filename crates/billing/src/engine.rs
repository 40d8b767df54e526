//! Payment engine: deposits and course payments.

use chrono::{DateTime, Utc};
use common::UserId;
use ledger_store::{Course, LedgerEntry, LedgerStore, LedgerStoreExt, Transaction, User};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::error::{BillingError, Result};
use crate::policy::PaymentPolicy;

/// Outcome of buying a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Purchase {
    /// Free course; nothing was charged or recorded.
    Free { course: Course },
    /// The payment transaction was committed.
    Paid {
        course: Course,
        transaction: Transaction,
    },
}

impl Purchase {
    pub fn course(&self) -> &Course {
        match self {
            Purchase::Free { course } | Purchase::Paid { course, .. } => course,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Purchase::Free { .. } => None,
            Purchase::Paid { transaction, .. } => Some(transaction),
        }
    }

    /// When access ends, for rents.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.transaction().and_then(|t| t.expires)
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Purchase::Free { .. })
    }
}

/// Enacts deposits and payments against a ledger store.
///
/// Every balance change is submitted to the store as one [`LedgerEntry`]
/// together with its preconditions, so the checks, the insert and the
/// balance update commit or roll back as a unit. Failures are returned to
/// the caller as-is; nothing is retried here.
pub struct PaymentEngine<S: LedgerStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
}

impl<S: LedgerStore> PaymentEngine<S> {
    /// Creates an engine on the wall clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: LedgerStore, C: Clock> PaymentEngine<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Returns a reference to the underlying ledger store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Credits `amount` to the user's balance.
    #[tracing::instrument(skip(self))]
    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(self.rejected("deposit", BillingError::InvalidAmount(amount)));
        }

        let entry = LedgerEntry::deposit(user_id, amount, self.clock.now());
        let transaction = self
            .store
            .apply(entry)
            .await
            .map_err(|e| self.rejected("deposit", e.into()))?;

        metrics::counter!("billing_deposits_total").increment(1);
        tracing::info!(
            %user_id,
            transaction_id = %transaction.id,
            %amount,
            "deposit applied"
        );

        Ok(transaction)
    }

    /// Buys the course with the given code.
    #[tracing::instrument(skip(self))]
    pub async fn pay(&self, user_id: UserId, course_code: &str) -> Result<Purchase> {
        let course = self
            .store
            .find_course_by_code(course_code)
            .await?
            .ok_or_else(|| {
                self.rejected(
                    "payment",
                    BillingError::CourseNotFound(course_code.to_string()),
                )
            })?;

        self.charge(user_id, &course).await
    }

    /// Buys an already resolved course.
    ///
    /// Only `course.id` is trusted: price and kind are reloaded from the
    /// store, so a stale or edited `Course` cannot change what is charged.
    /// Free courses short-circuit without touching the ledger. Otherwise the
    /// balance must cover the price (else `InsufficientFunds`) and no
    /// effective payment may exist (else `AlreadyPaid`), in that order.
    #[tracing::instrument(skip(self, course), fields(course_code = %course.code))]
    pub async fn payment(&self, user_id: UserId, course: &Course) -> Result<Purchase> {
        let stored = self.store.get_course(course.id).await?.ok_or_else(|| {
            self.rejected("payment", BillingError::CourseNotFound(course.code.clone()))
        })?;
        self.charge(user_id, &stored).await
    }

    async fn charge(&self, user_id: UserId, course: &Course) -> Result<Purchase> {
        let policy = PaymentPolicy::for_kind(course.kind);

        if !policy.charges() {
            self.user(user_id).await?;
            tracing::info!(%user_id, course_code = %course.code, "free course, nothing charged");
            return Ok(Purchase::Free {
                course: course.clone(),
            });
        }

        let price = course.charge().ok_or_else(|| {
            self.rejected("payment", BillingError::MissingPrice(course.code.clone()))
        })?;

        let now = self.clock.now();
        let entry = LedgerEntry::payment(user_id, course.id, price, now, policy.expires_at(now))
            .block_if_paid(course.id, policy.duplicate_window_at(now));

        let transaction = self
            .store
            .apply(entry)
            .await
            .map_err(|e| self.rejected("payment", e.into()))?;

        metrics::counter!("billing_payments_total", "kind" => course.kind.as_str()).increment(1);
        tracing::info!(
            %user_id,
            transaction_id = %transaction.id,
            course_code = %course.code,
            amount = %price,
            expires = ?transaction.expires,
            "payment applied"
        );

        Ok(Purchase::Paid {
            course: course.clone(),
            transaction,
        })
    }

    /// Loads a user, failing with `UserNotFound` if absent.
    pub async fn user(&self, user_id: UserId) -> Result<User> {
        Ok(self.store.require_user(user_id).await?)
    }

    /// Current balance of a user.
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        Ok(self.store.balance(user_id).await?)
    }

    fn rejected(&self, operation: &'static str, err: BillingError) -> BillingError {
        metrics::counter!(
            "billing_payments_rejected_total",
            "operation" => operation,
            "reason" => err.reason()
        )
        .increment(1);

        if err.is_retryable() {
            tracing::error!(operation, error = %err, "ledger operation failed");
        } else {
            tracing::warn!(operation, reason = err.reason(), error = %err, "ledger operation rejected");
        }
        err
    }
}
