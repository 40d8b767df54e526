//! Ledger data model: users, courses, transactions and ledger entries.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CourseId, TransactionId, UserId};

/// Role every registered user carries.
pub const ROLE_USER: &str = "ROLE_USER";

/// A billing customer with a materialized balance.
///
/// The balance is a running total maintained by [`crate::LedgerStore::apply`];
/// it is never recomputed from the transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub roles: BTreeSet<String>,
    pub balance: Decimal,
}

impl User {
    /// Creates a user with a zero balance and the default role.
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            password_hash: password_hash.into(),
            roles: BTreeSet::from([ROLE_USER.to_string()]),
            balance: Decimal::ZERO,
        }
    }

    /// Sets the opening balance. Negative values are clamped to zero.
    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance.max(Decimal::ZERO);
        self
    }

    /// Grants an additional role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// How a course is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseKind {
    Free,
    Rent,
    Buy,
}

impl CourseKind {
    pub const ALL: [CourseKind; 3] = [CourseKind::Free, CourseKind::Rent, CourseKind::Buy];

    /// Storage code used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseKind::Free => "free",
            CourseKind::Rent => "rent",
            CourseKind::Buy => "buy",
        }
    }

    /// Human readable label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            CourseKind::Free => "Free",
            CourseKind::Rent => "Rent",
            CourseKind::Buy => "Purchase",
        }
    }
}

impl std::fmt::Display for CourseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseKind {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(CourseKind::Free),
            "rent" => Ok(CourseKind::Rent),
            "buy" => Ok(CourseKind::Buy),
            other => Err(CourseError::UnknownKind(other.to_string())),
        }
    }
}

/// Catalog validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CourseError {
    #[error("Unknown course kind: {0}")]
    UnknownKind(String),

    #[error("Course name cannot be empty")]
    EmptyName,

    #[error("Course code cannot be empty")]
    EmptyCode,

    #[error("Paid course {0} must have a positive price")]
    MissingPrice(String),

    #[error("Free course {0} cannot be created as a paid course")]
    FreeCourseWithPrice(String),
}

/// A catalog course. Read-only input to the payment path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub name: String,
    pub kind: CourseKind,
    pub price: Option<Decimal>,
}

impl Course {
    /// Creates a free course. Free courses never carry a price.
    pub fn free(code: impl Into<String>, name: impl Into<String>) -> Result<Self, CourseError> {
        let (code, name) = Self::checked_names(code.into(), name.into())?;
        Ok(Self {
            id: CourseId::new(),
            code,
            name,
            kind: CourseKind::Free,
            price: None,
        })
    }

    /// Creates a rent or buy course with its price.
    pub fn paid(
        code: impl Into<String>,
        name: impl Into<String>,
        kind: CourseKind,
        price: Decimal,
    ) -> Result<Self, CourseError> {
        let (code, name) = Self::checked_names(code.into(), name.into())?;
        if kind == CourseKind::Free {
            return Err(CourseError::FreeCourseWithPrice(code));
        }
        if price <= Decimal::ZERO {
            return Err(CourseError::MissingPrice(code));
        }
        Ok(Self {
            id: CourseId::new(),
            code,
            name,
            kind,
            price: Some(price),
        })
    }

    fn checked_names(code: String, name: String) -> Result<(String, String), CourseError> {
        if code.trim().is_empty() {
            return Err(CourseError::EmptyCode);
        }
        if name.trim().is_empty() {
            return Err(CourseError::EmptyName);
        }
        Ok((code, name))
    }

    /// Price to charge, `None` for free courses regardless of the stored value.
    pub fn charge(&self) -> Option<Decimal> {
        match self.kind {
            CourseKind::Free => None,
            CourseKind::Rent | CourseKind::Buy => self.price,
        }
    }
}

/// Direction of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Payment,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Deposit => "deposit",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(TransactionKind::Payment),
            "deposit" => Ok(TransactionKind::Deposit),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// An append-only ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub customer: UserId,
    pub course: Option<CourseId>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed effect of this transaction on the customer's balance.
    pub fn balance_delta(&self) -> Decimal {
        match self.kind {
            TransactionKind::Deposit => self.amount,
            TransactionKind::Payment => -self.amount,
        }
    }

    /// Whether the transaction still grants access at `at`.
    ///
    /// Transactions without an expiry never lapse.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|expires| expires >= at)
    }
}

/// Blocks a payment when the customer already holds an effective one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentBlock {
    pub course: CourseId,
    /// When set, only payments with `expires > active_at` block.
    pub active_at: Option<DateTime<Utc>>,
}

/// Preconditions evaluated inside the atomic unit of [`crate::LedgerStore::apply`].
///
/// Checks run in field order: funds first, then the duplicate purchase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryGuard {
    pub require_funds: bool,
    pub block_if_paid: Option<PaymentBlock>,
}

/// A transaction together with the guard that must hold when it is applied.
///
/// The balance change is derived from the transaction itself, so the two can
/// never be submitted separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    transaction: Transaction,
    guard: EntryGuard,
}

impl LedgerEntry {
    /// Credits `amount` to the customer.
    pub fn deposit(customer: UserId, amount: Decimal, created: DateTime<Utc>) -> Self {
        Self {
            transaction: Transaction {
                id: TransactionId::new(),
                customer,
                course: None,
                kind: TransactionKind::Deposit,
                amount,
                created,
                expires: None,
            },
            guard: EntryGuard::default(),
        }
    }

    /// Debits `amount` for `course`. The balance must cover the debit.
    pub fn payment(
        customer: UserId,
        course: CourseId,
        amount: Decimal,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            transaction: Transaction {
                id: TransactionId::new(),
                customer,
                course: Some(course),
                kind: TransactionKind::Payment,
                amount,
                created,
                expires,
            },
            guard: EntryGuard {
                require_funds: true,
                block_if_paid: None,
            },
        }
    }

    /// Rejects the entry if an effective payment for `course` exists.
    pub fn block_if_paid(mut self, course: CourseId, active_at: Option<DateTime<Utc>>) -> Self {
        self.guard.block_if_paid = Some(PaymentBlock { course, active_at });
        self
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn guard(&self) -> &EntryGuard {
        &self.guard
    }

    pub fn customer(&self) -> UserId {
        self.transaction.customer
    }

    pub fn balance_delta(&self) -> Decimal {
        self.transaction.balance_delta()
    }

    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

/// A transaction joined with the course it pays for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub course_code: Option<String>,
    pub course_name: Option<String>,
    pub course_kind: Option<CourseKind>,
}

/// One aggregated line of the period report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReportRow {
    pub email: String,
    pub course_name: String,
    pub course_kind: CourseKind,
    pub count: i64,
    pub total: Decimal,
}

/// A rent payment about to lapse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringRent {
    pub email: String,
    pub course_code: String,
    pub course_name: String,
    pub expires: DateTime<Utc>,
}
