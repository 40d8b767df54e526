//! Ledger store for the course billing backend.
//!
//! Holds users with their materialized balances, the course catalog and the
//! append-only transaction log. Balance mutations only happen through
//! [`LedgerStore::apply`], which inserts a transaction and moves the balance
//! in one atomic unit.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{CourseId, TransactionId, UserId};
pub use error::{LedgerStoreError, Result};
pub use memory::InMemoryLedgerStore;
pub use model::{
    Course, CourseError, CourseKind, EntryGuard, ExpiringRent, LedgerEntry, PaymentBlock,
    PeriodReportRow, Transaction, TransactionKind, TransactionView, User,
};
pub use postgres::PostgresLedgerStore;
pub use query::TransactionQuery;
pub use store::{LedgerStore, LedgerStoreExt};
