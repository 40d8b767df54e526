//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use ledger_store::{
    Course, CourseKind, LedgerEntry, LedgerStore, LedgerStoreError, LedgerStoreExt,
    PostgresLedgerStore, TransactionKind, TransactionQuery, User,
};
use rust_decimal_macros::dec;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_billing_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE transactions, courses, users")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedgerStore::new(pool)
}

async fn seed(store: &PostgresLedgerStore) -> (User, Course, Course) {
    let user = store
        .create_user(User::new("user@studyon.com", "hash").with_balance(dec!(100)))
        .await
        .unwrap();
    let rent = store
        .create_course(Course::paid("php_1", "PHP for beginners", CourseKind::Rent, dec!(20)).unwrap())
        .await
        .unwrap();
    let buy = store
        .create_course(Course::paid("js_1", "JavaScript", CourseKind::Buy, dec!(30)).unwrap())
        .await
        .unwrap();
    (user, rent, buy)
}

#[tokio::test]
#[serial]
async fn users_and_courses_round_trip() {
    let store = get_test_store().await;
    let (user, rent, _) = seed(&store).await;

    let loaded = store.require_user(user.id).await.unwrap();
    assert_eq!(loaded.email, user.email);
    assert_eq!(loaded.roles, user.roles);
    assert_eq!(loaded.balance, dec!(100));

    let by_email = store.find_user_by_email("user@studyon.com").await.unwrap();
    assert_eq!(by_email.map(|u| u.id), Some(user.id));

    let course = store.find_course_by_code("php_1").await.unwrap().unwrap();
    assert_eq!(course, rent);

    let courses = store.list_courses().await.unwrap();
    let codes: Vec<_> = courses.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, vec!["js_1", "php_1"]);
}

#[tokio::test]
#[serial]
async fn unique_email_and_code_are_enforced() {
    let store = get_test_store().await;
    seed(&store).await;

    let user = store
        .create_user(User::new("user@studyon.com", "other"))
        .await;
    assert!(matches!(user, Err(LedgerStoreError::DuplicateEmail(_))));

    let course = store
        .create_course(Course::free("php_1", "Duplicate").unwrap())
        .await;
    assert!(matches!(
        course,
        Err(LedgerStoreError::DuplicateCourseCode(_))
    ));
}

#[tokio::test]
#[serial]
async fn apply_commits_transaction_and_balance_together() {
    let store = get_test_store().await;
    let (user, rent, _) = seed(&store).await;
    let now = Utc::now().trunc_subsecs(6);

    store
        .apply(LedgerEntry::deposit(user.id, dec!(0.55), now))
        .await
        .unwrap();
    let payment = store
        .apply(
            LedgerEntry::payment(user.id, rent.id, dec!(20), now, Some(now + Duration::days(7)))
                .block_if_paid(rent.id, Some(now)),
        )
        .await
        .unwrap();

    assert_eq!(store.balance(user.id).await.unwrap(), dec!(80.55));

    let history = store.transactions_for(user.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1], payment);
}

#[tokio::test]
#[serial]
async fn insufficient_funds_rolls_back() {
    let store = get_test_store().await;
    let (user, _, buy) = seed(&store).await;
    let now = Utc::now();

    for _ in 0..3 {
        store
            .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now, Some(now + Duration::days(1))))
            .await
            .unwrap();
    }

    let result = store
        .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now, None).block_if_paid(buy.id, None))
        .await;

    assert!(matches!(
        result,
        Err(LedgerStoreError::InsufficientFunds { .. })
    ));
    assert_eq!(store.balance(user.id).await.unwrap(), dec!(10));
    assert_eq!(store.transactions_for(user.id).await.unwrap().len(), 3);
}

#[tokio::test]
#[serial]
async fn already_paid_guard_blocks_second_purchase() {
    let store = get_test_store().await;
    let (user, _, buy) = seed(&store).await;
    let now = Utc::now();

    let entry = || LedgerEntry::payment(user.id, buy.id, dec!(30), now, None).block_if_paid(buy.id, None);
    store.apply(entry()).await.unwrap();

    let result = store.apply(entry()).await;
    assert!(matches!(result, Err(LedgerStoreError::AlreadyPaid { .. })));
    assert_eq!(store.balance(user.id).await.unwrap(), dec!(70));
}

#[tokio::test]
#[serial]
async fn permanent_purchase_index_maps_to_already_paid() {
    let store = get_test_store().await;
    let (user, _, buy) = seed(&store).await;
    let now = Utc::now();

    // Without a guard only the partial unique index stands in the way
    store
        .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now, None))
        .await
        .unwrap();
    let result = store
        .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now, None))
        .await;

    assert!(matches!(result, Err(LedgerStoreError::AlreadyPaid { .. })));
    assert_eq!(store.balance(user.id).await.unwrap(), dec!(70));
}

#[tokio::test]
#[serial]
async fn concurrent_payments_charge_once() {
    let store = get_test_store().await;
    let (user, rent, _) = seed(&store).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let (user_id, course_id) = (user.id, rent.id);
        handles.push(tokio::spawn(async move {
            let now = Utc::now();
            store
                .apply(
                    LedgerEntry::payment(user_id, course_id, dec!(20), now, Some(now + Duration::days(7)))
                        .block_if_paid(course_id, Some(now)),
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerStoreError::AlreadyPaid { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.balance(user.id).await.unwrap(), dec!(80));
}

#[tokio::test]
#[serial]
async fn query_filters_and_skip_expired() {
    let store = get_test_store().await;
    let (user, rent, buy) = seed(&store).await;
    let now = Utc::now().trunc_subsecs(6);

    store
        .apply(LedgerEntry::deposit(user.id, dec!(50), now - Duration::days(3)))
        .await
        .unwrap();
    store
        .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now - Duration::days(2), None))
        .await
        .unwrap();
    let expired = store
        .apply(LedgerEntry::payment(
            user.id,
            rent.id,
            dec!(20),
            now - Duration::days(1),
            Some(now + Duration::days(6)),
        ))
        .await
        .unwrap();
    store
        .backdate(expired.id, now - Duration::days(9), Some(now - Duration::days(2)))
        .await
        .unwrap();

    let unexpired = store
        .query_transactions(TransactionQuery::for_customer(user.id).unexpired_at(now))
        .await
        .unwrap();
    assert_eq!(unexpired.len(), 2);

    let payments = store
        .query_transactions(TransactionQuery::for_customer(user.id).kind(TransactionKind::Payment))
        .await
        .unwrap();
    assert_eq!(payments.len(), 2);
    // Backdated rent now sorts first
    assert_eq!(payments[0].transaction.id, expired.id);
    assert_eq!(payments[0].course_kind, Some(CourseKind::Rent));

    let by_code = store
        .query_transactions(TransactionQuery::for_customer(user.id).course_code("js_1"))
        .await
        .unwrap();
    assert_eq!(by_code.len(), 1);
    assert_eq!(by_code[0].course_name.as_deref(), Some("JavaScript"));
}

#[tokio::test]
#[serial]
async fn period_report_and_expiring_rents() {
    let store = get_test_store().await;
    let (user, rent, buy) = seed(&store).await;
    let now = Utc::now().trunc_subsecs(6);

    let first_rent = store
        .apply(LedgerEntry::payment(user.id, rent.id, dec!(20), now, Some(now + Duration::days(7))))
        .await
        .unwrap();
    store
        .backdate(first_rent.id, now - Duration::days(8), Some(now - Duration::days(1)))
        .await
        .unwrap();
    store
        .apply(LedgerEntry::payment(user.id, rent.id, dec!(20), now, Some(now + Duration::hours(12))))
        .await
        .unwrap();
    store
        .apply(LedgerEntry::payment(user.id, buy.id, dec!(30), now, None))
        .await
        .unwrap();
    store
        .apply(LedgerEntry::deposit(user.id, dec!(5), now))
        .await
        .unwrap();

    let rows = store
        .period_report(now - Duration::days(30), now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].course_name, "JavaScript");
    assert_eq!(rows[0].count, 1);
    assert_eq!(rows[1].course_name, "PHP for beginners");
    assert_eq!(rows[1].course_kind, CourseKind::Rent);
    assert_eq!(rows[1].count, 2);
    assert_eq!(rows[1].total, dec!(40));

    let rents = store
        .expiring_rents(now, now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(rents.len(), 1);
    assert_eq!(rents[0].course_code, "php_1");
    assert_eq!(rents[0].email, "user@studyon.com");
}
