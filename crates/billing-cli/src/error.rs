//! CLI error types with process exit code mapping.

use std::process::ExitCode;

use billing::BillingError;
use ledger_store::LedgerStoreError;

/// Errors raised by the CLI itself, before the billing core is reached.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("no user with email {0}")]
    UnknownEmail(String),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
}

/// Failure categories reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Unexpected failure, usually storage.
    Failure,
    /// The ledger refused the operation.
    Rejected,
    /// A referenced user or course does not exist.
    NotFound,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Failure => 1,
            Outcome::Rejected => 2,
            Outcome::NotFound => 3,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// Classifies an error chain for the process exit status.
pub fn outcome(err: &anyhow::Error) -> Outcome {
    if let Some(err) = err.downcast_ref::<BillingError>() {
        return billing_outcome(err);
    }
    if let Some(err) = err.downcast_ref::<CliError>() {
        return match err {
            CliError::UnknownEmail(_) => Outcome::NotFound,
            CliError::InvalidAmount(_) => Outcome::Rejected,
        };
    }
    if let Some(err) = err.downcast_ref::<LedgerStoreError>() {
        return store_outcome(err);
    }
    Outcome::Failure
}

fn store_outcome(err: &LedgerStoreError) -> Outcome {
    match err {
        LedgerStoreError::UserNotFound(_) | LedgerStoreError::CourseNotFound(_) => {
            Outcome::NotFound
        }
        LedgerStoreError::InsufficientFunds { .. }
        | LedgerStoreError::AlreadyPaid { .. }
        | LedgerStoreError::DuplicateEmail(_)
        | LedgerStoreError::DuplicateCourseCode(_) => Outcome::Rejected,
        _ => Outcome::Failure,
    }
}

fn billing_outcome(err: &BillingError) -> Outcome {
    match err {
        BillingError::UserNotFound(_) | BillingError::CourseNotFound(_) => Outcome::NotFound,
        BillingError::InvalidAmount(_)
        | BillingError::MissingPrice(_)
        | BillingError::InsufficientFunds { .. }
        | BillingError::AlreadyPaid { .. } => Outcome::Rejected,
        BillingError::Storage(_) => Outcome::Failure,
    }
}

#[cfg(test)]
mod tests {
    use ledger_store::{CourseId, UserId};
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn rejections_and_lookups_are_distinguished() {
        let rejected = anyhow::Error::new(BillingError::AlreadyPaid {
            user: UserId::new(),
            course: CourseId::new(),
        });
        assert_eq!(outcome(&rejected), Outcome::Rejected);

        let missing = anyhow::Error::new(BillingError::CourseNotFound("go_1".into()));
        assert_eq!(outcome(&missing), Outcome::NotFound);

        let email = anyhow::Error::new(CliError::UnknownEmail("x@example.com".into()));
        assert_eq!(outcome(&email), Outcome::NotFound);

        let amount = anyhow::Error::new(BillingError::InvalidAmount(Decimal::ZERO));
        assert_eq!(outcome(&amount).code(), 2);
    }

    #[test]
    fn context_does_not_hide_the_cause() {
        let err = anyhow::Error::new(BillingError::UserNotFound(UserId::new()))
            .context("deposit failed");
        assert_eq!(outcome(&err), Outcome::NotFound);
    }

    #[test]
    fn unknown_errors_are_failures() {
        let err = anyhow::anyhow!("connection refused");
        assert_eq!(outcome(&err), Outcome::Failure);

        let storage = anyhow::Error::new(LedgerStoreError::InvalidData("bad row".into()));
        assert_eq!(outcome(&storage), Outcome::Failure);
    }
}
