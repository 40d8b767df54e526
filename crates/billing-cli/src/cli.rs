//! Command line surface.

use clap::{Args, Parser, Subcommand};
use ledger_store::TransactionKind;

#[derive(Debug, Parser)]
#[command(name = "billing", about = "Course billing ledger operator CLI", long_about = None)]
pub struct Cli {
    /// Run against a freshly seeded in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply database migrations
    Migrate,
    /// Load the fixture users, courses and transactions
    Seed,
    /// Credit a user's balance
    Deposit(DepositArgs),
    /// Buy or rent a course
    Pay(PayArgs),
    /// List a user's transactions
    Transactions(TransactionsArgs),
    /// Per-customer statements for one month
    Report(ReportArgs),
    /// Rents about to end, grouped by customer
    RentNotices(RentNoticesArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DepositArgs {
    pub email: String,

    /// Amount as a decimal, e.g. 500.55
    pub amount: String,
}

#[derive(Debug, Clone, Args)]
pub struct PayArgs {
    pub email: String,
    pub course_code: String,
}

#[derive(Debug, Clone, Args)]
pub struct TransactionsArgs {
    pub email: String,

    /// Only `payment` or `deposit` transactions
    #[arg(long = "type", value_parser = parse_kind)]
    pub kind: Option<TransactionKind>,

    #[arg(long)]
    pub course_code: Option<String>,

    /// Drop rents whose access has already ended
    #[arg(long)]
    pub skip_expired: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// Any day of the month to report on (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub month: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, Args)]
pub struct RentNoticesArgs {
    /// Look-ahead in hours, at least 1; defaults to RENT_NOTICE_HOURS
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
    pub hours: Option<i64>,
}

fn parse_kind(raw: &str) -> Result<TransactionKind, String> {
    raw.parse()
}
