//! Monthly statements and rent-ending notices.
//!
//! Reports are plain values; rendering and delivery belong to the caller.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Utc};
use ledger_store::{CourseKind, ExpiringRent, LedgerStore, PeriodReportRow};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::repository::TransactionRepository;

/// Half-open bounds `[from, to)` of the month containing `date`: its first
/// instant and the first instant of the following month.
pub fn month_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = date - Days::new(u64::from(date.day0()));
    let from = first.and_time(NaiveTime::MIN).and_utc();
    let to = first
        .checked_add_months(Months::new(1))
        .map_or(DateTime::<Utc>::MAX_UTC, |next| {
            next.and_time(NaiveTime::MIN).and_utc()
        });
    (from, to)
}

/// One course on a customer's statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementLine {
    pub course_name: String,
    pub course_kind: CourseKind,
    /// Human readable kind: "Free", "Rent" or "Purchase".
    pub kind_label: &'static str,
    pub count: i64,
    pub total: Decimal,
}

impl From<PeriodReportRow> for StatementLine {
    fn from(row: PeriodReportRow) -> Self {
        Self {
            kind_label: row.course_kind.label(),
            course_name: row.course_name,
            course_kind: row.course_kind,
            count: row.count,
            total: row.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerStatement {
    pub email: String,
    pub lines: Vec<StatementLine>,
    pub total_paid: Decimal,
}

/// Per-customer spending over one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub period_from: DateTime<Utc>,
    pub period_to: DateTime<Utc>,
    pub statements: Vec<CustomerStatement>,
}

impl MonthlyReport {
    /// Groups report rows into one statement per email, keeping the order in
    /// which emails first appear.
    pub fn build(rows: Vec<PeriodReportRow>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let mut statements: Vec<CustomerStatement> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let position = *index.entry(row.email.clone()).or_insert_with(|| {
                statements.push(CustomerStatement {
                    email: row.email.clone(),
                    lines: Vec::new(),
                    total_paid: Decimal::ZERO,
                });
                statements.len() - 1
            });

            let statement = &mut statements[position];
            statement.total_paid += row.total;
            statement.lines.push(row.into());
        }

        Self {
            period_from: from,
            period_to: to,
            statements,
        }
    }

    /// Sum of every statement's total.
    pub fn grand_total(&self) -> Decimal {
        self.statements.iter().map(|s| s.total_paid).sum()
    }
}

/// Rents about to lapse for one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentEndingNotice {
    pub email: String,
    pub rents: Vec<ExpiringRent>,
}

impl RentEndingNotice {
    /// One notice per email, in order of first appearance.
    pub fn group(rents: Vec<ExpiringRent>) -> Vec<RentEndingNotice> {
        let mut notices: Vec<RentEndingNotice> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for rent in rents {
            let position = *index.entry(rent.email.clone()).or_insert_with(|| {
                notices.push(RentEndingNotice {
                    email: rent.email.clone(),
                    rents: Vec::new(),
                });
                notices.len() - 1
            });
            notices[position].rents.push(rent);
        }

        notices
    }
}

/// Produces reports relative to the clock's current time.
pub struct ReportService<S: LedgerStore, C: Clock = SystemClock> {
    repository: TransactionRepository<S>,
    clock: C,
}

impl<S: LedgerStore> ReportService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: LedgerStore, C: Clock> ReportService<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            repository: TransactionRepository::new(store),
            clock,
        }
    }

    pub fn repository(&self) -> &TransactionRepository<S> {
        &self.repository
    }

    /// Statements for the current calendar month.
    pub async fn monthly_statements(&self) -> Result<MonthlyReport> {
        self.statements_for_month(self.clock.now().date_naive())
            .await
    }

    /// Statements for the calendar month containing `date`.
    #[tracing::instrument(skip(self))]
    pub async fn statements_for_month(&self, date: NaiveDate) -> Result<MonthlyReport> {
        let (from, to) = month_bounds(date);
        let rows = self.repository.period_report(from, to).await?;
        let report = MonthlyReport::build(rows, from, to);

        tracing::info!(
            %from,
            %to,
            customers = report.statements.len(),
            total = %report.grand_total(),
            "monthly report built"
        );
        Ok(report)
    }

    /// Notices for rents ending within `within` from now.
    #[tracing::instrument(skip(self))]
    pub async fn rent_ending_notices(&self, within: Duration) -> Result<Vec<RentEndingNotice>> {
        let rents = self
            .repository
            .expiring_rents(self.clock.now(), within)
            .await?;
        let notices = RentEndingNotice::group(rents);

        tracing::info!(customers = notices.len(), "rent ending notices built");
        Ok(notices)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ledger_store::{Course, InMemoryLedgerStore, LedgerEntry, User};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::clock::ManualClock;

    fn row(email: &str, course: &str, kind: CourseKind, count: i64, total: Decimal) -> PeriodReportRow {
        PeriodReportRow {
            email: email.to_string(),
            course_name: course.to_string(),
            course_kind: kind,
            count,
            total,
        }
    }

    fn rent(email: &str, code: &str) -> ExpiringRent {
        ExpiringRent {
            email: email.to_string(),
            course_code: code.to_string(),
            course_name: code.to_uppercase(),
            expires: Utc::now(),
        }
    }

    #[test]
    fn month_bounds_regular_month() {
        let (from, to) = month_bounds(NaiveDate::from_ymd_opt(2024, 4, 17).unwrap());
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_bounds_leap_february_and_december() {
        let (_, to) = month_bounds(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        let (from, to) = month_bounds(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(from, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_sub_second_payment_at_month_end_lands_in_that_month() {
        let store = InMemoryLedgerStore::new();
        let user = store
            .create_user(User::new("user@example.com", "hash").with_balance(dec!(100)))
            .await
            .unwrap();
        let js = store
            .create_course(Course::paid("js_1", "JavaScript", CourseKind::Buy, dec!(30)).unwrap())
            .await
            .unwrap();

        let last_instant = Utc.with_ymd_and_hms(2024, 4, 30, 23, 59, 59).unwrap()
            + Duration::milliseconds(500);
        store
            .apply(LedgerEntry::payment(user.id, js.id, dec!(30), last_instant, None))
            .await
            .unwrap();

        let service = ReportService::with_clock(store, ManualClock::new(last_instant));

        let april = service
            .statements_for_month(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(april.statements.len(), 1);
        assert_eq!(april.grand_total(), dec!(30));

        let may = service
            .statements_for_month(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();
        assert!(may.statements.is_empty());
    }

    #[test]
    fn monthly_report_groups_by_email() {
        let (from, to) = month_bounds(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        let rows = vec![
            row("a@example.com", "JavaScript", CourseKind::Buy, 1, dec!(30)),
            row("a@example.com", "PHP", CourseKind::Rent, 2, dec!(40)),
            row("b@example.com", "PHP", CourseKind::Rent, 1, dec!(20)),
        ];

        let report = MonthlyReport::build(rows, from, to);

        assert_eq!(report.statements.len(), 2);
        let first = &report.statements[0];
        assert_eq!(first.email, "a@example.com");
        assert_eq!(first.lines.len(), 2);
        assert_eq!(first.lines[0].kind_label, "Purchase");
        assert_eq!(first.total_paid, dec!(70));
        assert_eq!(report.statements[1].total_paid, dec!(20));
        assert_eq!(report.grand_total(), dec!(90));
    }

    #[test]
    fn monthly_report_empty() {
        let (from, to) = month_bounds(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        let report = MonthlyReport::build(Vec::new(), from, to);
        assert!(report.statements.is_empty());
        assert_eq!(report.grand_total(), Decimal::ZERO);
    }

    #[test]
    fn rent_notices_group_by_email() {
        let notices = RentEndingNotice::group(vec![
            rent("a@example.com", "php_1"),
            rent("b@example.com", "php_1"),
            rent("a@example.com", "go_1"),
        ]);

        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].email, "a@example.com");
        assert_eq!(notices[0].rents.len(), 2);
        assert_eq!(notices[1].rents.len(), 1);
    }

    #[tokio::test]
    async fn test_report_service_uses_clock() {
        let store = InMemoryLedgerStore::new();
        let user = store
            .create_user(User::new("user@example.com", "hash").with_balance(dec!(100)))
            .await
            .unwrap();
        let php = store
            .create_course(Course::paid("php_1", "PHP", CourseKind::Rent, dec!(20)).unwrap())
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap();
        store
            .apply(LedgerEntry::payment(
                user.id,
                php.id,
                dec!(20),
                now - Duration::days(6) - Duration::hours(18),
                Some(now + Duration::hours(6)),
            ))
            .await
            .unwrap();
        // Previous month, excluded from the statement
        store
            .apply(LedgerEntry::payment(
                user.id,
                php.id,
                dec!(20),
                now - Duration::days(30),
                Some(now - Duration::days(23)),
            ))
            .await
            .unwrap();

        let service = ReportService::with_clock(store, ManualClock::new(now));

        let report = service.monthly_statements().await.unwrap();
        assert_eq!(report.statements.len(), 1);
        assert_eq!(report.statements[0].lines[0].count, 1);
        assert_eq!(report.statements[0].total_paid, dec!(20));

        let notices = service.rent_ending_notices(Duration::days(1)).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].rents[0].course_code, "php_1");

        let none = service.rent_ending_notices(Duration::hours(1)).await.unwrap();
        assert!(none.is_empty());
    }
}
