use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::{
    Course, CourseId, CourseKind, ExpiringRent, LedgerEntry, LedgerStoreError, PeriodReportRow,
    Result, Transaction, TransactionId, TransactionKind, TransactionQuery, TransactionView, User,
    UserId,
    store::{LedgerStore, check_funds, check_not_paid, validate_entry},
};

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<UserId, User>,
    courses: HashMap<CourseId, Course>,
    transactions: Vec<Transaction>,
}

impl LedgerState {
    fn count_payments(
        &self,
        user: UserId,
        course: CourseId,
        active_at: Option<DateTime<Utc>>,
    ) -> u64 {
        let count = self
            .transactions
            .iter()
            .filter(|t| {
                t.kind == TransactionKind::Payment
                    && t.customer == user
                    && t.course == Some(course)
            })
            .filter(|t| match active_at {
                Some(at) => t.expires.is_some_and(|expires| expires > at),
                None => true,
            })
            .count();
        count as u64
    }

    fn view(&self, transaction: &Transaction) -> TransactionView {
        let course = transaction.course.and_then(|id| self.courses.get(&id));
        TransactionView {
            transaction: transaction.clone(),
            course_code: course.map(|c| c.code.clone()),
            course_name: course.map(|c| c.name.clone()),
            course_kind: course.map(|c| c.kind),
        }
    }

    fn matches(&self, transaction: &Transaction, query: &TransactionQuery) -> bool {
        if let Some(customer) = query.customer
            && transaction.customer != customer
        {
            return false;
        }
        if let Some(kind) = query.kind
            && transaction.kind != kind
        {
            return false;
        }
        if let Some(ref code) = query.course_code {
            let course_code = transaction
                .course
                .and_then(|id| self.courses.get(&id))
                .map(|c| c.code.as_str());
            if course_code != Some(code.as_str()) {
                return false;
            }
        }
        if let Some(at) = query.unexpired_at
            && !transaction.is_active_at(at)
        {
            return false;
        }
        if let Some(from) = query.created_from
            && transaction.created < from
        {
            return false;
        }
        if let Some(to) = query.created_to
            && transaction.created > to
        {
            return false;
        }
        true
    }
}

/// In-memory ledger store implementation for testing and demos.
///
/// A single lock guards users, courses and transactions, so `apply` is
/// atomic with respect to every other operation on the store.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of transactions stored.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Clears all users, courses and transactions.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.users.clear();
        state.courses.clear();
        state.transactions.clear();
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
        let mut state = self.state.write().await;
        let transaction = state
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerStoreError::InvalidData(format!("unknown transaction {id}")))?;
        transaction.created = created;
        transaction.expires = expires;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(LedgerStoreError::DuplicateEmail(user.email));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_course(&self, course: Course) -> Result<Course> {
        let mut state = self.state.write().await;
        if state.courses.values().any(|c| c.code == course.code) {
            return Err(LedgerStoreError::DuplicateCourseCode(course.code));
        }
        state.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>> {
        Ok(self.state.read().await.courses.get(&id).cloned())
    }

    async fn find_course_by_code(&self, code: &str) -> Result<Option<Course>> {
        let state = self.state.read().await;
        Ok(state.courses.values().find(|c| c.code == code).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let state = self.state.read().await;
        let mut courses: Vec<_> = state.courses.values().cloned().collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(courses)
    }

    async fn apply(&self, entry: LedgerEntry) -> Result<Transaction> {
        validate_entry(&entry)?;

        let customer = entry.customer();
        let mut state = self.state.write().await;

        let balance = state
            .users
            .get(&customer)
            .map(|u| u.balance)
            .ok_or(LedgerStoreError::UserNotFound(customer))?;

        if let Some(course) = entry.transaction().course
            && !state.courses.contains_key(&course)
        {
            return Err(LedgerStoreError::CourseNotFound(course));
        }

        check_funds(&entry, balance)?;
        if let Some(block) = entry.guard().block_if_paid {
            let effective = state.count_payments(customer, block.course, block.active_at);
            check_not_paid(&entry, effective)?;
        }

        let delta = entry.balance_delta();
        let transaction = entry.into_transaction();

        // Nothing below can fail, so the insert and the balance move land together.
        if let Some(user) = state.users.get_mut(&customer) {
            user.balance += delta;
            debug_assert!(
                user.balance >= Decimal::ZERO,
                "balance went negative: {}",
                user.balance
            );
        }
        state.transactions.push(transaction.clone());

        Ok(transaction)
    }

    async fn count_payments(
        &self,
        user: UserId,
        course: CourseId,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .count_payments(user, course, active_at))
    }

    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<TransactionView>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Transaction> = state
            .transactions
            .iter()
            .filter(|t| state.matches(t, &query))
            .collect();

        // Stable sort keeps insertion order for equal timestamps
        matching.sort_by_key(|t| t.created);

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|t| state.view(t))
            .collect())
    }

    async fn period_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PeriodReportRow>> {
        let state = self.state.read().await;
        let mut groups: BTreeMap<(String, String, CourseId), (CourseKind, i64, Decimal)> =
            BTreeMap::new();

        for transaction in &state.transactions {
            if transaction.created < from || transaction.created >= to {
                continue;
            }
            let Some(course) = transaction.course.and_then(|id| state.courses.get(&id)) else {
                continue;
            };
            let Some(user) = state.users.get(&transaction.customer) else {
                continue;
            };

            let group = groups
                .entry((user.email.clone(), course.name.clone(), course.id))
                .or_insert((course.kind, 0, Decimal::ZERO));
            group.1 += 1;
            group.2 += transaction.amount;
        }

        Ok(groups
            .into_iter()
            .map(
                |((email, course_name, _), (course_kind, count, total))| PeriodReportRow {
                    email,
                    course_name,
                    course_kind,
                    count,
                    total,
                },
            )
            .collect())
    }

    async fn expiring_rents(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpiringRent>> {
        let state = self.state.read().await;
        let mut rents: Vec<ExpiringRent> = state
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Payment)
            .filter_map(|t| {
                let expires = t.expires?;
                if expires <= from || expires > to {
                    return None;
                }
                let course = state.courses.get(&t.course?)?;
                if course.kind != CourseKind::Rent {
                    return None;
                }
                let user = state.users.get(&t.customer)?;
                Some(ExpiringRent {
                    email: user.email.clone(),
                    course_code: course.code.clone(),
                    course_name: course.name.clone(),
                    expires,
                })
            })
            .collect();

        rents.sort_by(|a, b| a.email.cmp(&b.email).then(a.expires.cmp(&b.expires)));
        Ok(rents)
    }
}
