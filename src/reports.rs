/// read-side views over the ledger
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{LedgerAmount, LedgerRow};
use crate::store::{LedgerStore, StudentDirectory};
use crate::types::{StudentId, YearMonth};

/// one student's line in the month listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthSummaryLine {
    pub student: StudentId,
    pub student_name: String,
    pub grade: String,
    pub tuitions: String,
    pub opening: Money,
    pub paid: Money,
    pub closing: Money,
    /// closing balance of the student's most recent row
    pub latest_closing: Money,
    pub latest_period: Option<YearMonth>,
}

/// serializable debt listing for a month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub year_month: YearMonth,
    pub grade: Option<String>,
    pub lines: Vec<MonthSummaryLine>,
    pub total_opening: Money,
    pub total_paid: Money,
    pub total_closing: Money,
    pub total_latest_closing: Money,
}

impl MonthSummary {
    /// every active student, optionally one grade only; students without
    /// a row for the month show zero amounts
    pub fn build(
        ledger: &dyn LedgerStore,
        directory: &dyn StudentDirectory,
        year_month: YearMonth,
        grade: Option<&str>,
    ) -> Result<Self> {
        let rows: BTreeMap<StudentId, LedgerRow> = ledger
            .rows_for_month(year_month)?
            .into_iter()
            .map(|row| (row.student.clone(), row))
            .collect();

        let mut students = directory.active_students()?;
        students.retain(|s| grade.map_or(true, |g| s.grade == g));
        students.sort_by(|a, b| a.id.cmp(&b.id));

        let mut lines = Vec::with_capacity(students.len());
        for student in students {
            let latest = ledger.latest_for_student(&student.id)?;
            let row = rows.get(&student.id);
            lines.push(MonthSummaryLine {
                tuitions: row.map(LedgerRow::tuitions_joined).unwrap_or_default(),
                opening: row.map_or(Money::ZERO, |r| r.opening.total),
                paid: row.map_or(Money::ZERO, |r| r.paid.total),
                closing: row.map_or(Money::ZERO, |r| r.closing.total),
                latest_closing: latest.as_ref().map_or(Money::ZERO, |r| r.closing.total),
                latest_period: latest.as_ref().map(|r| r.year_month),
                student: student.id,
                student_name: student.name,
                grade: student.grade,
            });
        }

        Ok(Self {
            year_month,
            grade: grade.map(str::to_string),
            total_opening: lines.iter().map(|l| l.opening).sum(),
            total_paid: lines.iter().map(|l| l.paid).sum(),
            total_closing: lines.iter().map(|l| l.closing).sum(),
            total_latest_closing: lines.iter().map(|l| l.latest_closing).sum(),
            lines,
        })
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// one student's month in detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStatement {
    pub student: StudentId,
    pub student_name: String,
    pub grade: String,
    pub year_month: YearMonth,
    pub has_row: bool,
    pub opening: LedgerAmount,
    pub due: LedgerAmount,
    pub paid: LedgerAmount,
    pub closing: LedgerAmount,
    pub latest_period: Option<YearMonth>,
    pub latest_closing: LedgerAmount,
}

impl StudentStatement {
    pub fn build(
        ledger: &dyn LedgerStore,
        directory: &dyn StudentDirectory,
        id: &StudentId,
        year_month: YearMonth,
    ) -> Result<Self> {
        let student = directory
            .get_student(id)?
            .ok_or_else(|| LedgerError::StudentNotFound { student: id.clone() })?;
        let row = ledger.get(id, year_month)?;
        let latest = ledger.latest_for_student(id)?;

        let (opening, due, paid, closing) = match &row {
            Some(r) => (r.opening.clone(), r.due.clone(), r.paid.clone(), r.closing.clone()),
            None => Default::default(),
        };

        Ok(Self {
            student: student.id,
            student_name: student.name,
            grade: student.grade,
            year_month,
            has_row: row.is_some(),
            opening,
            due,
            paid,
            closing,
            latest_period: latest.as_ref().map(|r| r.year_month),
            latest_closing: latest.map(|r| r.closing).unwrap_or_default(),
        })
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// sum of closing balances over a month
pub fn outstanding_total(ledger: &dyn LedgerStore, year_month: YearMonth) -> Result<Money> {
    Ok(ledger
        .rows_for_month(year_month)?
        .iter()
        .map(|row| row.closing.total)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{FeeCode, Student};
    use chrono::Utc;
    use uuid::Uuid;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn row(student: &str, period: &str, opening: i64, paid: i64, closing: i64) -> LedgerRow {
        let now = Utc::now();
        let code = FeeCode::new("HP06");
        LedgerRow {
            id: Uuid::new_v4(),
            student: StudentId::new(student),
            student_name: String::new(),
            year_month: ym(period),
            tuitions: vec![code.clone()],
            opening: LedgerAmount::from_details([(code.clone(), Money::from_major(opening))]),
            assessed: LedgerAmount::new(),
            due: LedgerAmount::new(),
            paid: LedgerAmount::from_details([(code.clone(), Money::from_major(paid))]),
            closing: LedgerAmount::from_details([(code, Money::from_major(closing))]),
            invoice_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_student(Student::new("1", "An", "6"));
        store.add_student(Student::new("2", "Binh", "7"));
        store.add_student(Student::new("3", "Chi", "6"));
        for period in ["2025-01", "2025-02"] {
            store.ensure_partition(ym(period)).unwrap();
        }
        store.insert_if_absent(&row("1", "2025-01", 0, 500, -200)).unwrap();
        store.insert_if_absent(&row("1", "2025-02", -200, 100, -800)).unwrap();
        store.insert_if_absent(&row("2", "2025-01", 100, 0, -600)).unwrap();
        store
    }

    #[test]
    fn test_month_summary_totals() {
        let store = store();
        let summary = MonthSummary::build(&store, &store, ym("2025-01"), None).unwrap();

        assert_eq!(summary.lines.len(), 3);
        assert_eq!(summary.total_opening, Money::from_major(100));
        assert_eq!(summary.total_paid, Money::from_major(500));
        assert_eq!(summary.total_closing, Money::from_major(-800));
        // student 1 has moved on to february
        assert_eq!(summary.lines[0].latest_closing, Money::from_major(-800));
        assert_eq!(summary.lines[0].latest_period, Some(ym("2025-02")));
        assert_eq!(summary.total_latest_closing, Money::from_major(-1_400));

        let chi = &summary.lines[2];
        assert_eq!(chi.closing, Money::ZERO);
        assert!(chi.latest_period.is_none());

        let json = summary.to_json_pretty().unwrap();
        assert!(json.contains("\"total_closing\""));
    }

    #[test]
    fn test_month_summary_grade_filter() {
        let store = store();
        let summary = MonthSummary::build(&store, &store, ym("2025-01"), Some("7")).unwrap();
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.lines[0].student, StudentId::new("2"));
        assert_eq!(summary.grade.as_deref(), Some("7"));
    }

    #[test]
    fn test_statement() {
        let store = store();
        let statement = StudentStatement::build(&store, &store, &StudentId::new("1"), ym("2025-01")).unwrap();
        assert!(statement.has_row);
        assert_eq!(statement.paid.total, Money::from_major(500));
        assert_eq!(statement.latest_closing.total, Money::from_major(-800));

        let empty = StudentStatement::build(&store, &store, &StudentId::new("3"), ym("2025-01")).unwrap();
        assert!(!empty.has_row);
        assert!(empty.closing.is_zero());

        let err = StudentStatement::build(&store, &store, &StudentId::new("9"), ym("2025-01")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_outstanding_total() {
        let store = store();
        assert_eq!(outstanding_total(&store, ym("2025-01")).unwrap(), Money::from_major(-800));
        assert_eq!(outstanding_total(&store, ym("2025-03")).unwrap(), Money::ZERO);
    }
}
