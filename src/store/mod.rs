//! Collaborator interfaces the ledger core reads from and writes to.
//!
//! The core never talks to a database directly: student records, the
//! tuition catalog and the payment feed are owned elsewhere, and ledger
//! rows / running balances are persisted through [`LedgerStore`] and
//! [`BalanceStore`]. Two backends ship with the crate, [`MemoryStore`]
//! and [`SqliteLedgerStore`].

pub mod memory;
pub mod sqlite;

use crate::balance::RunningBalance;
use crate::errors::Result;
use crate::ledger::LedgerRow;
use crate::types::{FeeDefinition, PaymentEvent, Student, StudentId, YearMonth};

pub use memory::MemoryStore;
pub use sqlite::SqliteLedgerStore;

/// read access to student records
pub trait StudentDirectory: Send + Sync {
    fn get_student(&self, id: &StudentId) -> Result<Option<Student>>;

    /// every student not marked as having left school
    fn active_students(&self) -> Result<Vec<Student>>;
}

/// read access to fee definitions
pub trait TuitionCatalog: Send + Sync {
    /// catalog entries for a grade, in catalog order
    fn fee_definitions(&self, grade: &str) -> Result<Vec<FeeDefinition>>;
}

/// read access to posted payments
pub trait PaymentFeed: Send + Sync {
    fn payments_for_student_month(
        &self,
        id: &StudentId,
        year_month: YearMonth,
    ) -> Result<Vec<PaymentEvent>>;

    /// full payment history for a student
    fn payments_for_student(&self, id: &StudentId) -> Result<Vec<PaymentEvent>>;
}

/// month-partitioned storage of ledger rows keyed by (student, year-month)
///
/// Writers provision a month with [`LedgerStore::ensure_partition`] before
/// inserting into it; the store itself never creates partitions.
pub trait LedgerStore: Send + Sync {
    /// provision the partition for a month; a no-op when it exists
    fn ensure_partition(&self, year_month: YearMonth) -> Result<()>;

    fn has_partition(&self, year_month: YearMonth) -> Result<bool>;

    fn count_month(&self, year_month: YearMonth) -> Result<usize>;

    fn get(&self, student: &StudentId, year_month: YearMonth) -> Result<Option<LedgerRow>>;

    /// insert unless a row with the same key exists; returns whether it was
    /// written. [`crate::errors::LedgerError::PartitionMissing`] when the
    /// month is not provisioned.
    fn insert_if_absent(&self, row: &LedgerRow) -> Result<bool>;

    /// read-modify-write a single row under its lock.
    ///
    /// The closure works on a copy; the copy is persisted only when the
    /// closure returns `Ok`, so a failed update leaves the row untouched.
    fn update_atomic(
        &self,
        student: &StudentId,
        year_month: YearMonth,
        apply: &mut dyn FnMut(&mut LedgerRow) -> Result<()>,
    ) -> Result<LedgerRow>;

    fn rows_for_month(&self, year_month: YearMonth) -> Result<Vec<LedgerRow>>;

    /// the student's row with the greatest year-month
    fn latest_for_student(&self, student: &StudentId) -> Result<Option<LedgerRow>>;

    /// delete every row of a calendar year; returns the number removed
    fn purge_year(&self, year: i32) -> Result<usize>;
}

/// storage of the per-student running balance
pub trait BalanceStore: Send + Sync {
    fn get_balance(&self, student: &StudentId) -> Result<Option<RunningBalance>>;

    fn put_balance(&self, balance: &RunningBalance) -> Result<()>;

    fn remove_balance(&self, student: &StudentId) -> Result<()>;
}
