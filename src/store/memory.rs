use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::balance::RunningBalance;
use crate::errors::{LedgerError, Result};
use crate::ledger::LedgerRow;
use crate::types::{FeeDefinition, PaymentEvent, Student, StudentId, YearMonth};

use super::{BalanceStore, LedgerStore, PaymentFeed, StudentDirectory, TuitionCatalog};

/// in-process backend for every collaborator, used by tests and demos
#[derive(Debug, Default)]
pub struct MemoryStore {
    students: RwLock<BTreeMap<StudentId, Student>>,
    fees: RwLock<Vec<FeeDefinition>>,
    payments: RwLock<Vec<PaymentEvent>>,
    partitions: RwLock<BTreeSet<YearMonth>>,
    rows: Mutex<BTreeMap<(StudentId, YearMonth), LedgerRow>>,
    balances: RwLock<BTreeMap<StudentId, RunningBalance>>,
    fail_balance_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_student(&self, student: Student) {
        self.students
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(student.id.clone(), student);
    }

    /// mark a student as having left school
    pub fn withdraw_student(&self, id: &StudentId) -> bool {
        match self
            .students
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            Some(student) => {
                student.active = false;
                true
            }
            None => false,
        }
    }

    pub fn add_fee(&self, fee: FeeDefinition) {
        self.fees.write().unwrap_or_else(PoisonError::into_inner).push(fee);
    }

    /// record a posted payment in the feed
    pub fn add_payment(&self, payment: PaymentEvent) {
        self.payments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payment);
    }

    /// make every balance write fail, to exercise the stale path
    pub fn fail_balance_writes(&self, fail: bool) {
        self.fail_balance_writes.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl StudentDirectory for MemoryStore {
    fn get_student(&self, id: &StudentId) -> Result<Option<Student>> {
        let students = self.students.read().unwrap_or_else(PoisonError::into_inner);
        Ok(students.get(id).cloned())
    }

    fn active_students(&self) -> Result<Vec<Student>> {
        let students = self.students.read().unwrap_or_else(PoisonError::into_inner);
        Ok(students.values().filter(|s| s.active).cloned().collect())
    }
}

impl TuitionCatalog for MemoryStore {
    fn fee_definitions(&self, grade: &str) -> Result<Vec<FeeDefinition>> {
        let fees = self.fees.read().unwrap_or_else(PoisonError::into_inner);
        Ok(fees.iter().filter(|f| f.grade == grade).cloned().collect())
    }
}

impl PaymentFeed for MemoryStore {
    fn payments_for_student_month(
        &self,
        id: &StudentId,
        year_month: YearMonth,
    ) -> Result<Vec<PaymentEvent>> {
        let payments = self.payments.read().unwrap_or_else(PoisonError::into_inner);
        Ok(payments
            .iter()
            .filter(|p| &p.student == id && p.year_month == year_month)
            .cloned()
            .collect())
    }

    fn payments_for_student(&self, id: &StudentId) -> Result<Vec<PaymentEvent>> {
        let payments = self.payments.read().unwrap_or_else(PoisonError::into_inner);
        Ok(payments.iter().filter(|p| &p.student == id).cloned().collect())
    }
}

impl LedgerStore for MemoryStore {
    fn ensure_partition(&self, year_month: YearMonth) -> Result<()> {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(year_month);
        Ok(())
    }

    fn has_partition(&self, year_month: YearMonth) -> Result<bool> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(partitions.contains(&year_month))
    }

    fn count_month(&self, year_month: YearMonth) -> Result<usize> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.keys().filter(|(_, ym)| *ym == year_month).count())
    }

    fn get(&self, student: &StudentId, year_month: YearMonth) -> Result<Option<LedgerRow>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(&(student.clone(), year_month)).cloned())
    }

    fn insert_if_absent(&self, row: &LedgerRow) -> Result<bool> {
        if !self.has_partition(row.year_month)? {
            return Err(LedgerError::PartitionMissing {
                year_month: row.year_month,
            });
        }
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (row.student.clone(), row.year_month);
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, row.clone());
        Ok(true)
    }

    fn update_atomic(
        &self,
        student: &StudentId,
        year_month: YearMonth,
        apply: &mut dyn FnMut(&mut LedgerRow) -> Result<()>,
    ) -> Result<LedgerRow> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (student.clone(), year_month);
        let mut working = rows
            .get(&key)
            .cloned()
            .ok_or_else(|| LedgerError::LedgerRowNotFound {
                student: student.clone(),
                year_month,
            })?;
        apply(&mut working)?;
        rows.insert(key, working.clone());
        Ok(working)
    }

    fn rows_for_month(&self, year_month: YearMonth) -> Result<Vec<LedgerRow>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .values()
            .filter(|r| r.year_month == year_month)
            .cloned()
            .collect())
    }

    fn latest_for_student(&self, student: &StudentId) -> Result<Option<LedgerRow>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .iter()
            .filter(|((id, _), _)| id == student)
            .map(|(_, row)| row)
            .last()
            .cloned())
    }

    fn purge_year(&self, year: i32) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = rows.len();
        rows.retain(|(_, ym), _| ym.year() != year);
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|ym| ym.year() != year);
        Ok(before - rows.len())
    }
}

impl BalanceStore for MemoryStore {
    fn get_balance(&self, student: &StudentId) -> Result<Option<RunningBalance>> {
        let balances = self.balances.read().unwrap_or_else(PoisonError::into_inner);
        Ok(balances.get(student).cloned())
    }

    fn put_balance(&self, balance: &RunningBalance) -> Result<()> {
        if self.fail_balance_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::storage("balance storage unavailable"));
        }
        self.balances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(balance.student.clone(), balance.clone());
        Ok(())
    }

    fn remove_balance(&self, student: &StudentId) -> Result<()> {
        self.balances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(student);
        Ok(())
    }
}
