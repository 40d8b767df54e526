//! Identifier types shared by every crate in the billing workspace.

pub mod types;

pub use types::{CourseId, TransactionId, UserId};
