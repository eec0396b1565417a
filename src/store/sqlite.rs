use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::balance::RunningBalance;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::distribution::AdvanceSummary;
use crate::errors::{LedgerError, Result};
use crate::ledger::{LedgerAmount, LedgerRow};
use crate::types::{FeeCode, InvoiceId, StudentId, YearMonth};

use super::{BalanceStore, LedgerStore};

const ROW_COLUMNS: &str = "mshs, year_month, id, student_name, tuitions, dudau, assessed, \
                           phaithu, dathu, duno, invoice_ids, created_at, updated_at";

/// ledger rows and running balances in a SQLite database
///
/// Legacy amounts stored as a bare total are given a breakdown on read,
/// booked on `carry_code`, so every loaded amount sums to its total.
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
    carry_code: FeeCode,
}

impl SqliteLedgerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// wrap an existing connection, creating tables as needed
    pub fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            carry_code: LedgerConfig::default().carry_code,
        })
    }

    /// code that receives legacy totals; match `LedgerConfig::carry_code`
    pub fn with_carry_code(mut self, code: FeeCode) -> Self {
        self.carry_code = code;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_partitions(
            year_month TEXT PRIMARY KEY
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_rows(
            mshs TEXT NOT NULL,
            year_month TEXT NOT NULL,
            id TEXT NOT NULL,
            student_name TEXT NOT NULL DEFAULT '',
            tuitions TEXT NOT NULL DEFAULT '',
            dudau TEXT,
            assessed TEXT,
            phaithu TEXT,
            dathu TEXT,
            duno TEXT,
            invoice_ids TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(mshs, year_month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_balance(
            mshs TEXT PRIMARY KEY,
            balance TEXT NOT NULL,
            detail TEXT,
            advance TEXT,
            through TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// ledger row as read from SQL, before normalization
struct StoredRow {
    mshs: String,
    year_month: String,
    id: String,
    student_name: String,
    tuitions: String,
    dudau: Value,
    assessed: Value,
    phaithu: Value,
    dathu: Value,
    duno: Value,
    invoice_ids: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StoredRow {
    fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mshs: row.get(0)?,
            year_month: row.get(1)?,
            id: row.get(2)?,
            student_name: row.get(3)?,
            tuitions: row.get(4)?,
            dudau: row.get(5)?,
            assessed: row.get(6)?,
            phaithu: row.get(7)?,
            dathu: row.get(8)?,
            duno: row.get(9)?,
            invoice_ids: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_ledger_row(self, carry_code: &FeeCode) -> Result<LedgerRow> {
        let due = amount_from_sql(self.phaithu)?;
        // rows written before `assessed` existed only know the outstanding due
        let assessed = match self.assessed {
            Value::Null => due.clone(),
            other => amount_from_sql(other)?,
        };
        let invoice_ids: Vec<InvoiceId> = match self.invoice_ids.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        let mut row = LedgerRow {
            id: Uuid::parse_str(&self.id).map_err(|e| LedgerError::storage(e.to_string()))?,
            student: StudentId::new(self.mshs),
            student_name: self.student_name,
            year_month: self.year_month.parse()?,
            tuitions: self
                .tuitions
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(FeeCode::new)
                .collect(),
            opening: amount_from_sql(self.dudau)?,
            assessed,
            due,
            paid: amount_from_sql(self.dathu)?,
            closing: amount_from_sql(self.duno)?,
            invoice_ids,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        };
        row.settle_gaps(carry_code);
        Ok(row)
    }
}

/// normalize an amount column: json object, bare number, or null
fn amount_from_sql(value: Value) -> Result<LedgerAmount> {
    match value {
        Value::Null => Ok(LedgerAmount::new()),
        Value::Integer(n) => Ok(bare_total(Money::from_major(n))),
        Value::Real(f) => Ok(bare_total(money_from_f64(f)?)),
        Value::Text(raw) => amount_from_json(&raw),
        Value::Blob(_) => Err(LedgerError::storage("amount column holds a blob")),
    }
}

fn amount_from_json(raw: &str) -> Result<LedgerAmount> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(LedgerAmount::new());
    }
    match serde_json::from_str::<serde_json::Value>(trimmed)? {
        serde_json::Value::Null => Ok(LedgerAmount::new()),
        serde_json::Value::Number(n) => Ok(bare_total(
            Money::from_str_exact(&n.to_string()).map_err(|e| LedgerError::storage(e.to_string()))?,
        )),
        serde_json::Value::String(s) => Ok(bare_total(
            Money::from_str_exact(&s).map_err(|e| LedgerError::storage(e.to_string()))?,
        )),
        object => Ok(serde_json::from_value(object)?),
    }
}

fn bare_total(total: Money) -> LedgerAmount {
    LedgerAmount {
        total,
        details: BTreeMap::new(),
    }
}

fn money_from_f64(f: f64) -> Result<Money> {
    Decimal::try_from(f)
        .map(Money::from_decimal)
        .map_err(|e| LedgerError::storage(e.to_string()))
}

fn money_from_sql(value: Value) -> Result<Money> {
    match value {
        Value::Integer(n) => Ok(Money::from_major(n)),
        Value::Real(f) => money_from_f64(f),
        Value::Text(s) => Money::from_str_exact(s.trim()).map_err(|e| LedgerError::storage(e.to_string())),
        Value::Null => Ok(Money::ZERO),
        Value::Blob(_) => Err(LedgerError::storage("balance column holds a blob")),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::storage(format!("bad timestamp {raw}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl LedgerStore for SqliteLedgerStore {
    fn ensure_partition(&self, year_month: YearMonth) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO ledger_partitions(year_month) VALUES (?1)",
            params![year_month.to_string()],
        )?;
        Ok(())
    }

    fn has_partition(&self, year_month: YearMonth) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM ledger_partitions WHERE year_month = ?1",
                params![year_month.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_month(&self, year_month: YearMonth) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM ledger_rows WHERE year_month = ?1",
            params![year_month.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn get(&self, student: &StudentId, year_month: YearMonth) -> Result<Option<LedgerRow>> {
        let sql = format!("SELECT {ROW_COLUMNS} FROM ledger_rows WHERE mshs = ?1 AND year_month = ?2");
        let stored = self
            .conn()
            .query_row(
                &sql,
                params![student.as_str(), year_month.to_string()],
                StoredRow::from_sql,
            )
            .optional()?;
        stored.map(|r| r.into_ledger_row(&self.carry_code)).transpose()
    }

    fn insert_if_absent(&self, row: &LedgerRow) -> Result<bool> {
        if !self.has_partition(row.year_month)? {
            return Err(LedgerError::PartitionMissing {
                year_month: row.year_month,
            });
        }
        let changed = self.conn().execute(
            &format!(
                "INSERT OR IGNORE INTO ledger_rows({ROW_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                row.student.as_str(),
                row.year_month.to_string(),
                row.id.to_string(),
                row.student_name,
                row.tuitions_joined(),
                to_json(&row.opening)?,
                to_json(&row.assessed)?,
                to_json(&row.due)?,
                to_json(&row.paid)?,
                to_json(&row.closing)?,
                to_json(&row.invoice_ids)?,
                row.created_at.to_rfc3339(),
                row.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn update_atomic(
        &self,
        student: &StudentId,
        year_month: YearMonth,
        apply: &mut dyn FnMut(&mut LedgerRow) -> Result<()>,
    ) -> Result<LedgerRow> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!("SELECT {ROW_COLUMNS} FROM ledger_rows WHERE mshs = ?1 AND year_month = ?2");
        let stored = tx
            .query_row(
                &sql,
                params![student.as_str(), year_month.to_string()],
                StoredRow::from_sql,
            )
            .optional()?
            .ok_or_else(|| LedgerError::LedgerRowNotFound {
                student: student.clone(),
                year_month,
            })?;

        let mut row = stored.into_ledger_row(&self.carry_code)?;
        // an error here drops the transaction, rolling it back
        apply(&mut row)?;

        tx.execute(
            "UPDATE ledger_rows
             SET tuitions = ?3, dudau = ?4, assessed = ?5, phaithu = ?6, dathu = ?7,
                 duno = ?8, invoice_ids = ?9, updated_at = ?10
             WHERE mshs = ?1 AND year_month = ?2",
            params![
                student.as_str(),
                year_month.to_string(),
                row.tuitions_joined(),
                to_json(&row.opening)?,
                to_json(&row.assessed)?,
                to_json(&row.due)?,
                to_json(&row.paid)?,
                to_json(&row.closing)?,
                to_json(&row.invoice_ids)?,
                row.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(row)
    }

    fn rows_for_month(&self, year_month: YearMonth) -> Result<Vec<LedgerRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROW_COLUMNS} FROM ledger_rows WHERE year_month = ?1 ORDER BY mshs"
        ))?;
        let stored = stmt
            .query_map(params![year_month.to_string()], StoredRow::from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stored.into_iter().map(|r| r.into_ledger_row(&self.carry_code)).collect()
    }

    fn latest_for_student(&self, student: &StudentId) -> Result<Option<LedgerRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM ledger_rows WHERE mshs = ?1 ORDER BY year_month DESC LIMIT 1"
        );
        let stored = self
            .conn()
            .query_row(&sql, params![student.as_str()], StoredRow::from_sql)
            .optional()?;
        stored.map(|r| r.into_ledger_row(&self.carry_code)).transpose()
    }

    fn purge_year(&self, year: i32) -> Result<usize> {
        let prefix = format!("{:04}-%", year);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM ledger_rows WHERE year_month LIKE ?1", params![prefix])?;
        tx.execute("DELETE FROM ledger_partitions WHERE year_month LIKE ?1", params![prefix])?;
        tx.commit()?;
        Ok(removed)
    }
}

impl BalanceStore for SqliteLedgerStore {
    fn get_balance(&self, student: &StudentId) -> Result<Option<RunningBalance>> {
        let found = self
            .conn()
            .query_row(
                "SELECT balance, detail, advance, through, updated_at
                 FROM student_balance WHERE mshs = ?1",
                params![student.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Value>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((balance, detail, advance, through, updated_at)) = found else {
            return Ok(None);
        };

        let mut by_code: BTreeMap<FeeCode, Money> = match detail.as_deref() {
            None | Some("") => BTreeMap::new(),
            Some(raw) => serde_json::from_str(raw)?,
        };
        let advance: AdvanceSummary = match advance.as_deref() {
            None | Some("") => AdvanceSummary::default(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        let balance = money_from_sql(balance)?;
        let gap = balance - by_code.values().copied().sum::<Money>();
        if !gap.is_zero() {
            *by_code.entry(self.carry_code.clone()).or_insert(Money::ZERO) += gap;
        }

        Ok(Some(RunningBalance {
            student: student.clone(),
            balance,
            by_code,
            advance,
            through: through.parse()?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    fn put_balance(&self, balance: &RunningBalance) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO student_balance(mshs, balance, detail, advance, through, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                balance.student.as_str(),
                balance.balance.to_string(),
                to_json(&balance.by_code)?,
                to_json(&balance.advance)?,
                balance.through.to_string(),
                balance.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remove_balance(&self, student: &StudentId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM student_balance WHERE mshs = ?1",
            params![student.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::RunningBalanceService;
    use crate::events::EventStore;
    use crate::ledger::{IncrementalUpdater, MonthlyLedgerBuilder};
    use crate::store::MemoryStore;
    use crate::types::{FeeDefinition, FeeGroup, MonthSet, PaymentEntry, Student};
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn code(c: &str) -> FeeCode {
        FeeCode::new(c)
    }

    fn row(student: &str, period: &str) -> LedgerRow {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let assessed = LedgerAmount::from_details([(code("HP06"), Money::from_major(500_000))]);
        LedgerRow {
            id: Uuid::new_v4(),
            student: StudentId::new(student),
            student_name: "An".to_string(),
            year_month: ym(period),
            tuitions: vec![code("HP06")],
            opening: LedgerAmount::new(),
            assessed: assessed.clone(),
            due: assessed,
            paid: LedgerAmount::new(),
            closing: LedgerAmount::from_details([(code("HP06"), Money::from_major(-500_000))]),
            invoice_ids: vec![3],
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let original = row("100001", "2025-01");

        assert!(matches!(
            store.insert_if_absent(&original),
            Err(LedgerError::PartitionMissing { .. })
        ));

        store.ensure_partition(ym("2025-01")).unwrap();
        store.ensure_partition(ym("2025-01")).unwrap();
        assert!(store.has_partition(ym("2025-01")).unwrap());
        assert!(store.insert_if_absent(&original).unwrap());
        assert!(!store.insert_if_absent(&row("100001", "2025-01")).unwrap());
        assert_eq!(store.count_month(ym("2025-01")).unwrap(), 1);

        let loaded = store.get(&StudentId::new("100001"), ym("2025-01")).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.get(&StudentId::new("100002"), ym("2025-01")).unwrap().is_none());
    }

    #[test]
    fn test_update_commits_or_rolls_back() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        store.ensure_partition(ym("2025-01")).unwrap();
        store.insert_if_absent(&row("100001", "2025-01")).unwrap();
        let id = StudentId::new("100001");

        let updated = store
            .update_atomic(&id, ym("2025-01"), &mut |row: &mut LedgerRow| -> Result<()> {
                row.paid.add(&code("HP06"), Money::from_major(200_000));
                row.link_invoice(9);
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.invoice_ids, vec![3, 9]);

        let failed = store.update_atomic(&id, ym("2025-01"), &mut |row: &mut LedgerRow| -> Result<()> {
            row.paid.add(&code("HP06"), Money::from_major(1));
            Err(LedgerError::EmptyPayment)
        });
        assert!(failed.is_err());

        let loaded = store.get(&id, ym("2025-01")).unwrap().unwrap();
        assert_eq!(loaded.paid.total, Money::from_major(200_000));

        let missing = store.update_atomic(&StudentId::new("x"), ym("2025-01"), &mut |_: &mut LedgerRow| -> Result<()> { Ok(()) });
        assert!(matches!(missing, Err(LedgerError::LedgerRowNotFound { .. })));
    }

    #[test]
    fn test_legacy_columns_are_normalized() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO ledger_rows(mshs, year_month, id, student_name, tuitions, dudau, phaithu, dathu, duno, invoice_ids, created_at, updated_at)
                 VALUES ('100009', '2024-09', ?1, 'Old', 'HP06, NT06', 150000,
                         '{\"totalamount\": 700000, \"details\": {\"HP06\": \"500000\", \"NT06\": \"200000\"}}',
                         '{\"totalPaidAmount\": \"0\"}', '-550000', NULL,
                         '2024-09-01T00:00:00+00:00', '2024-09-01T00:00:00+00:00')",
                params![Uuid::new_v4().to_string()],
            )
            .unwrap();

        let row = store.get(&StudentId::new("100009"), ym("2024-09")).unwrap().unwrap();
        assert_eq!(row.opening.total, Money::from_major(150_000));
        assert_eq!(row.opening.get(&code("CARRY")), Money::from_major(150_000));
        assert_eq!(row.due.total, Money::from_major(700_000));
        assert_eq!(row.assessed, row.due);
        assert_eq!(row.paid.total, Money::ZERO);
        assert_eq!(row.closing.total, Money::from_major(-550_000));
        assert_eq!(row.closing.details_sum(), row.closing.total);
        assert_eq!(row.tuitions, vec![code("HP06"), code("NT06")]);
        assert!(row.invoice_ids.is_empty());
    }

    #[test]
    fn test_legacy_closing_survives_payment_and_carry_forward() {
        let config = LedgerConfig::default();
        let school = MemoryStore::new();
        school.add_student(Student::new("100009", "Old", "6"));
        school.add_fee(FeeDefinition::new("HP06", "Tuition", Money::from_major(500_000), "6", MonthSet::all(), FeeGroup::PrimaryTuition));

        let store = SqliteLedgerStore::open_in_memory().unwrap();
        store.ensure_partition(ym("2024-09")).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO ledger_rows(mshs, year_month, id, student_name, tuitions, dudau, phaithu, dathu, duno, created_at, updated_at)
                 VALUES ('100009', '2024-09', ?1, 'Old', 'HP06', 150000, 700000, 0, '-550000',
                         '2024-09-01T00:00:00+00:00', '2024-09-01T00:00:00+00:00')",
                params![Uuid::new_v4().to_string()],
            )
            .unwrap();

        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()));
        let mut events = EventStore::new();
        let id = StudentId::new("100009");

        let september = IncrementalUpdater::new(&config, &store)
            .apply(&id, ym("2024-09"), &[PaymentEntry::new("HP06", Money::from_major(100_000))], 12, &time, &mut events)
            .unwrap()
            .row;
        assert_eq!(september.closing.total, Money::from_major(-450_000));
        assert_eq!(september.closing.get(&config.carry_code), Money::from_major(-550_000));
        assert!(september.is_consistent(&config.exempt_codes));
        assert_eq!(store.get(&id, ym("2024-09")).unwrap().unwrap(), september);

        let balances = RunningBalanceService::new(&config, &school, &school, &school, &school);
        let builder = MonthlyLedgerBuilder::new(&config, &school, &school, &school, &store, &balances);
        let october = builder.insert_student(&id, ym("2024-10"), &time, &mut events).unwrap();
        assert_eq!(october.opening.total, Money::from_major(-450_000));
        assert_eq!(october.closing.total, Money::from_major(-950_000));
        assert!(october.is_consistent(&config.exempt_codes));
    }

    #[test]
    fn test_month_listing_latest_and_purge() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        for period in ["2024-12", "2025-01"] {
            store.ensure_partition(ym(period)).unwrap();
            store.insert_if_absent(&row("100001", period)).unwrap();
        }
        store.insert_if_absent(&row("100002", "2025-01")).unwrap();

        let january = store.rows_for_month(ym("2025-01")).unwrap();
        let students: Vec<&str> = january.iter().map(|r| r.student.as_str()).collect();
        assert_eq!(students, vec!["100001", "100002"]);

        let latest = store.latest_for_student(&StudentId::new("100001")).unwrap().unwrap();
        assert_eq!(latest.year_month, ym("2025-01"));

        assert_eq!(store.purge_year(2024).unwrap(), 1);
        assert!(!store.has_partition(ym("2024-12")).unwrap());
        assert!(store.has_partition(ym("2025-01")).unwrap());
        assert_eq!(store.count_month(ym("2025-01")).unwrap(), 2);
    }

    #[test]
    fn test_balance_round_trip_and_legacy_numbers() {
        let store = SqliteLedgerStore::open_in_memory().unwrap();
        let id = StudentId::new("100001");
        let mut balance = RunningBalance::new(id.clone(), ym("2025-01"), Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
        balance.adjust(&code("HP06"), Money::from_major(1_250_000));
        balance.adjust(&code("NT06"), Money::from_major(400_000));
        balance.advance = AdvanceSummary::compute(balance.balance, Money::from_major(700_000));

        store.put_balance(&balance).unwrap();
        assert_eq!(store.get_balance(&id).unwrap(), Some(balance.clone()));

        store.remove_balance(&id).unwrap();
        assert!(store.get_balance(&id).unwrap().is_none());

        store
            .conn()
            .execute(
                "INSERT INTO student_balance(mshs, balance, detail, advance, through, updated_at)
                 VALUES ('100002', 300000, NULL, NULL, '2025-01', '2025-01-02T03:04:05+00:00')",
                [],
            )
            .unwrap();
        let legacy = store.get_balance(&StudentId::new("100002")).unwrap().unwrap();
        assert_eq!(legacy.balance, Money::from_major(300_000));
        assert_eq!(legacy.code_balance(&code("CARRY")), Money::from_major(300_000));
        assert_eq!(legacy.advance, AdvanceSummary::default());
    }
}
