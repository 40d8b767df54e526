//! Billing core for the course catalog.
//!
//! This crate provides:
//! - [`PaymentEngine`]: deposits and course payments as atomic ledger entries
//! - [`PaymentPolicy`]: what each course kind (free, rent, buy) means for payment
//! - [`TransactionRepository`]: filtered lookups over the ledger
//! - [`ReportService`]: monthly statements and rent-ending notices

pub mod clock;
pub mod engine;
pub mod error;
pub mod policy;
pub mod report;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{PaymentEngine, Purchase};
pub use error::{BillingError, Result};
pub use policy::{Access, PaymentPolicy, RENT_WINDOW_DAYS};
pub use report::{
    CustomerStatement, MonthlyReport, RentEndingNotice, ReportService, StatementLine,
    month_bounds,
};
pub use repository::TransactionRepository;
