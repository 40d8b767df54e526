use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Course, CourseId, CourseKind, ExpiringRent, LedgerEntry, LedgerStoreError, PeriodReportRow,
    Result, Transaction, TransactionId, TransactionQuery, TransactionView, User, UserId,
    store::{LedgerStore, check_funds, check_not_paid, validate_entry},
};

const TRANSACTION_COLUMNS: &str = r#"
    t.id, t.customer_id, t.course_id, t.kind, t.amount, t.created, t.expires,
    c.code AS course_code, c.name AS course_name, c.kind AS course_kind
"#;

/// PostgreSQL-backed ledger store implementation.
///
/// `apply` serializes per customer with a row-level lock on the user row.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Rewrites the timestamps of a stored transaction.
    ///
    /// Fixture helper for simulating the passage of time; the ledger itself
    /// never updates transactions.
    pub async fn backdate(
        &self,
        id: TransactionId,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE transactions SET created = $2, expires = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(created)
            .bind(expires)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerStoreError::InvalidData(format!(
                "unknown transaction {id}"
            )));
        }
        Ok(())
    }

    async fn count_payments_with<'e, E>(
        executor: E,
        user: UserId,
        course: CourseId,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<u64>
    where
        E: PgExecutor<'e>,
    {
        let count: i64 = match active_at {
            Some(at) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM transactions
                    WHERE kind = 'payment' AND customer_id = $1 AND course_id = $2 AND expires > $3
                    "#,
                )
                .bind(user.as_uuid())
                .bind(course.as_uuid())
                .bind(at)
                .fetch_one(executor)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM transactions
                    WHERE kind = 'payment' AND customer_id = $1 AND course_id = $2
                    "#,
                )
                .bind(user.as_uuid())
                .bind(course.as_uuid())
                .fetch_one(executor)
                .await?
            }
        };

        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn row_to_user(row: PgRow) -> Result<User> {
        let roles: Vec<String> = row.try_get("roles")?;
        Ok(User {
            id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            roles: roles.into_iter().collect(),
            balance: row.try_get("balance")?,
        })
    }

    fn row_to_course(row: PgRow) -> Result<Course> {
        Ok(Course {
            id: CourseId::from_uuid(row.try_get::<Uuid, _>("id")?),
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            kind: parse_course_kind(row.try_get("kind")?)?,
            price: row.try_get("price")?,
        })
    }

    fn row_to_view(row: PgRow) -> Result<TransactionView> {
        let kind: String = row.try_get("kind")?;
        let course_kind: Option<String> = row.try_get("course_kind")?;

        Ok(TransactionView {
            transaction: Transaction {
                id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
                customer: UserId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
                course: row
                    .try_get::<Option<Uuid>, _>("course_id")?
                    .map(CourseId::from_uuid),
                kind: kind.parse().map_err(LedgerStoreError::InvalidData)?,
                amount: row.try_get("amount")?,
                created: row.try_get("created")?,
                expires: row.try_get("expires")?,
            },
            course_code: row.try_get("course_code")?,
            course_name: row.try_get("course_name")?,
            course_kind: course_kind.map(parse_course_kind).transpose()?,
        })
    }
}

fn parse_course_kind(value: String) -> Result<CourseKind> {
    value
        .parse()
        .map_err(|e: crate::CourseError| LedgerStoreError::InvalidData(e.to_string()))
}

fn constraint_violated(error: &sqlx::Error, constraint: &str) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let roles: Vec<String> = user.roles.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, roles, balance)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(roles)
        .bind(user.balance)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if constraint_violated(&e, "unique_user_email") {
                return LedgerStoreError::DuplicateEmail(user.email.clone());
            }
            LedgerStoreError::Database(e)
        })?;

        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, roles, balance FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, roles, balance FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn create_course(&self, course: Course) -> Result<Course> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, code, name, kind, price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(course.id.as_uuid())
        .bind(&course.code)
        .bind(&course.name)
        .bind(course.kind.as_str())
        .bind(course.price)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if constraint_violated(&e, "unique_course_code") {
                return LedgerStoreError::DuplicateCourseCode(course.code.clone());
            }
            LedgerStoreError::Database(e)
        })?;

        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>> {
        let row = sqlx::query("SELECT id, code, name, kind, price FROM courses WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_course).transpose()
    }

    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>> {
        let row = sqlx::query("SELECT id, code, name, kind, price FROM courses WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_course).transpose()
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query("SELECT id, code, name, kind, price FROM courses ORDER BY code ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_course).collect()
    }

    async fn apply(&self, entry: LedgerEntry) -> Result<Transaction> {
        validate_entry(&entry)?;

        let customer = entry.customer();
        let mut tx = self.pool.begin().await?;

        // Row lock on the customer serializes concurrent entries for that user
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(customer.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let balance = balance.ok_or(LedgerStoreError::UserNotFound(customer))?;

        check_funds(&entry, balance)?;
        if let Some(block) = entry.guard().block_if_paid {
            let effective =
                Self::count_payments_with(&mut *tx, customer, block.course, block.active_at)
                    .await?;
            check_not_paid(&entry, effective)?;
        }

        let delta = entry.balance_delta();
        let transaction = entry.into_transaction();

        sqlx::query(
            r#"
            INSERT INTO transactions (id, customer_id, course_id, kind, amount, created, expires)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.customer.as_uuid())
        .bind(transaction.course.map(|c| c.as_uuid()))
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(transaction.created)
        .bind(transaction.expires)
        .execute(&mut *tx)
        .await
        .map_err(|e| match transaction.course {
            Some(course) if constraint_violated(&e, "unique_permanent_purchase") => {
                LedgerStoreError::AlreadyPaid {
                    user: customer,
                    course,
                }
            }
            Some(course) if constraint_violated(&e, "fk_transactions_course") => {
                LedgerStoreError::CourseNotFound(course)
            }
            _ => LedgerStoreError::Database(e),
        })?;

        sqlx::query("UPDATE users SET balance = balance + $2 WHERE id = $1")
            .bind(customer.as_uuid())
            .bind(delta)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            transaction_id = %transaction.id,
            %customer,
            kind = %transaction.kind,
            amount = %transaction.amount,
            "ledger entry committed"
        );

        Ok(transaction)
    }

    async fn count_payments(
        &self,
        user: UserId,
        course: CourseId,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        Self::count_payments_with(&self.pool, user, course, active_at).await
    }

    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<TransactionView>> {
        let mut sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t LEFT JOIN courses c ON c.id = t.course_id WHERE 1=1"
        );
        let mut param_count = 0;

        // Build dynamic query
        if query.customer.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.customer_id = ${param_count}"));
        }
        if query.kind.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.kind = ${param_count}"));
        }
        if query.course_code.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND c.code = ${param_count}"));
        }
        if query.unexpired_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (t.expires IS NULL OR t.expires >= ${param_count})"
            ));
        }
        if query.created_from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.created >= ${param_count}"));
        }
        if query.created_to.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.created <= ${param_count}"));
        }

        sql.push_str(" ORDER BY t.created ASC, t.id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        // Build and execute query with parameters
        let mut sqlx_query = sqlx::query(&sql);

        if let Some(customer) = query.customer {
            sqlx_query = sqlx_query.bind(customer.as_uuid());
        }
        if let Some(kind) = query.kind {
            sqlx_query = sqlx_query.bind(kind.as_str());
        }
        if let Some(code) = query.course_code {
            sqlx_query = sqlx_query.bind(code);
        }
        if let Some(at) = query.unexpired_at {
            sqlx_query = sqlx_query.bind(at);
        }
        if let Some(from) = query.created_from {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.created_to {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_view).collect()
    }

    async fn period_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PeriodReportRow>> {
        let rows = sqlx::query(
            r#"
            SELECT u.email, c.name AS course_name, c.kind AS course_kind,
                   COUNT(t.id) AS transactions_count, SUM(t.amount) AS total
            FROM transactions t
            INNER JOIN courses c ON c.id = t.course_id
            INNER JOIN users u ON u.id = t.customer_id
            WHERE t.created >= $1 AND t.created < $2
            GROUP BY u.email, c.id, c.name, c.kind
            ORDER BY u.email ASC, c.name ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<PeriodReportRow> {
                Ok(PeriodReportRow {
                    email: row.try_get("email")?,
                    course_name: row.try_get("course_name")?,
                    course_kind: parse_course_kind(row.try_get("course_kind")?)?,
                    count: row.try_get("transactions_count")?,
                    total: row.try_get("total")?,
                })
            })
            .collect()
    }

    async fn expiring_rents(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpiringRent>> {
        let rows = sqlx::query(
            r#"
            SELECT u.email, c.code AS course_code, c.name AS course_name, t.expires
            FROM transactions t
            INNER JOIN courses c ON c.id = t.course_id
            INNER JOIN users u ON u.id = t.customer_id
            WHERE t.kind = 'payment' AND c.kind = 'rent'
              AND t.expires > $1 AND t.expires <= $2
            ORDER BY u.email ASC, t.expires ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ExpiringRent> {
                Ok(ExpiringRent {
                    email: row.try_get("email")?,
                    course_code: row.try_get("course_code")?,
                    course_name: row.try_get("course_name")?,
                    expires: row.try_get("expires")?,
                })
            })
            .collect()
    }
}
