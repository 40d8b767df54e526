//! Fixture users, courses and transaction history.

use billing::{Clock, PaymentEngine, SystemClock};
use chrono::Duration;
use ledger_store::{Course, CourseKind, LedgerStore, LedgerStoreExt, User, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::store::OperatorStore;

pub const ROLE_SUPER_ADMIN: &str = "ROLE_SUPER_ADMIN";

/// Placeholder credential; authentication lives outside the ledger.
const FIXTURE_PASSWORD_HASH: &str = "!fixture";

/// (email, opening balance, extra role)
const USERS: [(&str, i64, Option<&str>); 3] = [
    ("user@studyon.com", 500, None),
    ("user_no_money@studyon.com", 0, None),
    ("user_admin@studyon.com", 1000, Some(ROLE_SUPER_ADMIN)),
];

/// (code, name, kind, price)
const COURSES: [(&str, &str, CourseKind, i64); 5] = [
    (
        "figma_1",
        "Web design in Figma: UI/UX fundamentals in practice",
        CourseKind::Free,
        0,
    ),
    ("php_1", "PHP for beginners", CourseKind::Rent, 20),
    (
        "js_1",
        "Frontend developer: HTML, CSS and JavaScript",
        CourseKind::Buy,
        30,
    ),
    ("test_buy", "test_buy", CourseKind::Buy, 40),
    ("test_rent", "test_rent", CourseKind::Rent, 10),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub users: usize,
    pub courses: usize,
    pub transactions: usize,
    /// True when every fixture was already present and nothing was written.
    pub skipped: bool,
}

/// Loads whatever part of the fixtures is missing.
///
/// Users and courses are matched by email and code. The transaction history
/// is written only while `user@studyon.com` has none, so a run that failed
/// halfway is completed by the next one. The history gives that user two
/// deposits, a lapsed PHP rent, a JavaScript purchase and a PHP rent ending
/// in 23 hours.
pub async fn seed<S: OperatorStore>(store: &S) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    let mut user_ids = Vec::with_capacity(USERS.len());
    for (email, balance, role) in USERS {
        if let Some(existing) = store.find_user_by_email(email).await? {
            user_ids.push(existing.id);
            continue;
        }
        let mut user =
            User::new(email, FIXTURE_PASSWORD_HASH).with_balance(Decimal::from(balance));
        if let Some(role) = role {
            user = user.with_role(role);
        }
        user_ids.push(store.create_user(user).await?.id);
        summary.users += 1;
    }

    for (code, name, kind, price) in COURSES {
        if store.find_course_by_code(code).await?.is_some() {
            continue;
        }
        let course = match kind {
            CourseKind::Free => Course::free(code, name)?,
            CourseKind::Rent | CourseKind::Buy => {
                Course::paid(code, name, kind, Decimal::from(price))?
            }
        };
        store.create_course(course).await?;
        summary.courses += 1;
    }

    let user = user_ids[0];
    if store.transactions_for(user).await?.is_empty() {
        summary.transactions = load_history(store, user).await?;
    } else {
        tracing::debug!(%user, "transaction history already present");
    }

    summary.skipped = summary.users == 0 && summary.courses == 0 && summary.transactions == 0;
    if summary.skipped {
        tracing::info!("fixtures already loaded");
    } else {
        tracing::info!(
            users = summary.users,
            courses = summary.courses,
            transactions = summary.transactions,
            "fixtures loaded"
        );
    }
    Ok(summary)
}

async fn load_history<S: OperatorStore>(store: &S, user: UserId) -> anyhow::Result<usize> {
    let engine = PaymentEngine::new(store.clone());
    let now = SystemClock.now();

    engine.deposit(user, Decimal::new(50055, 2)).await?;
    engine.deposit(user, Decimal::new(12332, 2)).await?;

    let lapsed = engine.pay(user, "php_1").await?;
    if let Some(transaction) = lapsed.transaction() {
        store
            .backdate(
                transaction.id,
                now - Duration::days(2),
                Some(now - Duration::days(1)),
            )
            .await?;
    }

    engine.pay(user, "js_1").await?;

    let ending = engine.pay(user, "php_1").await?;
    if let Some(transaction) = ending.transaction() {
        store
            .backdate(
                transaction.id,
                transaction.created,
                Some(now + Duration::hours(23)),
            )
            .await?;
    }
    Ok(5)
}
