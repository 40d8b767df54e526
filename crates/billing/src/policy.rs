//! What each course kind means for payment.
//!
//! | kind | price | duplicate window | access |
//! |------|-------|------------------|--------|
//! | free | never | n/a | unconditional, nothing is charged |
//! | rent | yes | 7 days from purchase | re-purchasable once the rent expires |
//! | buy  | yes | unbounded | one-time, permanent |

use chrono::{DateTime, Duration, Utc};
use ledger_store::CourseKind;

/// Length of a rent, in days.
pub const RENT_WINDOW_DAYS: i64 = 7;

/// Access granted by a course kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No purchase needed.
    Unconditional,
    /// Access for a fixed period after each purchase.
    TimeBounded(Duration),
    /// Access forever after a single purchase.
    Permanent,
}

/// Payment behaviour of one course kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentPolicy {
    pub kind: CourseKind,
    pub access: Access,
}

impl PaymentPolicy {
    pub fn for_kind(kind: CourseKind) -> Self {
        let access = match kind {
            CourseKind::Free => Access::Unconditional,
            CourseKind::Rent => Access::TimeBounded(Duration::days(RENT_WINDOW_DAYS)),
            CourseKind::Buy => Access::Permanent,
        };
        Self { kind, access }
    }

    /// Whether a price must be set on the course.
    pub fn requires_price(&self) -> bool {
        self.charges()
    }

    /// Whether buying the course creates a payment transaction.
    pub fn charges(&self) -> bool {
        !matches!(self.access, Access::Unconditional)
    }

    /// Length of the rent window, if the kind is time bounded.
    pub fn rent_window(&self) -> Option<Duration> {
        match self.access {
            Access::TimeBounded(window) => Some(window),
            Access::Unconditional | Access::Permanent => None,
        }
    }

    /// Expiry to stamp on a payment created at `created`.
    pub fn expires_at(&self, created: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rent_window().map(|window| created + window)
    }

    /// `active_at` filter for the duplicate purchase check.
    ///
    /// Rent payments only block while `expires > now`; permanent purchases
    /// block forever, so no time filter applies.
    pub fn duplicate_window_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rent_window().map(|_| now)
    }
}
