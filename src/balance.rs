use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::catalog::FeeCatalogResolver;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::distribution::AdvanceSummary;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::store::{BalanceStore, PaymentFeed, StudentDirectory, TuitionCatalog};
use crate::types::{entries_total, FeeCode, PaymentEntry, Student, StudentId, YearMonth};

/// lifetime balance of one student, positive means in credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningBalance {
    #[serde(rename = "mshs")]
    pub student: StudentId,
    pub balance: Money,
    /// net per fee code; sums to `balance`
    #[serde(rename = "detail", default)]
    pub by_code: BTreeMap<FeeCode, Money>,
    #[serde(default)]
    pub advance: AdvanceSummary,
    /// last period folded into the balance
    pub through: YearMonth,
    pub updated_at: DateTime<Utc>,
}

impl RunningBalance {
    pub fn new(student: StudentId, through: YearMonth, updated_at: DateTime<Utc>) -> Self {
        Self {
            student,
            balance: Money::ZERO,
            by_code: BTreeMap::new(),
            advance: AdvanceSummary::default(),
            through,
            updated_at,
        }
    }

    /// move one code's bucket and the total together
    pub fn adjust(&mut self, code: &FeeCode, delta: Money) {
        let bucket = self.by_code.entry(code.clone()).or_insert(Money::ZERO);
        *bucket += delta;
        if bucket.is_zero() {
            self.by_code.remove(code);
        }
        self.balance += delta;
    }

    pub fn code_balance(&self, code: &FeeCode) -> Money {
        self.by_code.get(code).copied().unwrap_or(Money::ZERO)
    }

    pub fn is_in_credit(&self) -> bool {
        self.balance.is_positive()
    }
}

/// result of a balance write that is allowed to degrade
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceUpdate {
    Updated(RunningBalance),
    /// student absent from the directory, nothing written
    StudentMissing,
    /// write failed; the cached balance was dropped and will be
    /// recomputed on the next read
    Stale { reason: String },
}

impl BalanceUpdate {
    pub fn balance(&self) -> Option<&RunningBalance> {
        match self {
            BalanceUpdate::Updated(balance) => Some(balance),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, BalanceUpdate::Stale { .. })
    }
}

/// maintains the per-student running balance cache
pub struct RunningBalanceService<'a> {
    config: &'a LedgerConfig,
    directory: &'a dyn StudentDirectory,
    catalog: &'a dyn TuitionCatalog,
    payments: &'a dyn PaymentFeed,
    store: &'a dyn BalanceStore,
}

impl<'a> RunningBalanceService<'a> {
    pub fn new(
        config: &'a LedgerConfig,
        directory: &'a dyn StudentDirectory,
        catalog: &'a dyn TuitionCatalog,
        payments: &'a dyn PaymentFeed,
        store: &'a dyn BalanceStore,
    ) -> Self {
        Self {
            config,
            directory,
            catalog,
            payments,
            store,
        }
    }

    /// first period replayed when recomputing through `as_of`
    pub fn replay_start(&self, as_of: YearMonth) -> YearMonth {
        let start_month = if as_of.month() >= self.config.cycle_start_month {
            self.config.cycle_start_month
        } else {
            1
        };
        YearMonth::new(as_of.year(), start_month).unwrap_or(as_of)
    }

    /// stored balance, or a full recompute through `as_of` that is
    /// persisted before returning
    pub fn get(
        &self,
        id: &StudentId,
        as_of: YearMonth,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<RunningBalance> {
        let student = self.student(id)?;

        match self.store.get_balance(id) {
            Ok(Some(stored)) => return Ok(stored),
            Ok(None) => {}
            Err(e) => warn!(student = %id, error = %e, "balance read failed, recomputing"),
        }

        let balance = self.replay(&student, as_of, time)?;
        info!(student = %id, through = %as_of, balance = %balance.balance, "running balance recomputed");
        events.emit(LedgerEvent::BalanceRecomputed {
            student: id.clone(),
            through: as_of,
            balance: balance.balance,
            timestamp: time.now(),
        });

        if let Err(e) = self.store.put_balance(&balance) {
            self.mark_stale(id, &e, time, events);
        }
        Ok(balance)
    }

    /// replay every period from the cycle start through `as_of`: payments
    /// on non-exempt codes credited, resolved dues debited, per code. Reads only,
    /// nothing is persisted.
    pub fn replay(
        &self,
        student: &Student,
        as_of: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<RunningBalance> {
        let start = self.replay_start(as_of);
        let mut balance = self.replay_range(student, start, as_of, time)?;
        let current_total = FeeCatalogResolver::new(self.catalog)
            .resolve_for(student, as_of)?
            .total();
        balance.advance = AdvanceSummary::compute(balance.balance, current_total);
        debug!(
            student = %student.id,
            from = %start,
            through = %as_of,
            balance = %balance.balance,
            "replayed running balance"
        );
        Ok(balance)
    }

    /// balance carried into `year_month`: the same replay stopped one
    /// period short, so the first period of a window starts from zero
    pub fn balance_before(
        &self,
        student: &Student,
        year_month: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<Money> {
        let start = self.replay_start(year_month);
        if start == year_month {
            return Ok(Money::ZERO);
        }
        let balance = self.replay_range(student, start, year_month.prev(), time)?;
        Ok(balance.balance)
    }

    fn replay_range(
        &self,
        student: &Student,
        start: YearMonth,
        end: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<RunningBalance> {
        let resolver = FeeCatalogResolver::new(self.catalog);
        let history = self.payments.payments_for_student(&student.id)?;

        let mut balance = RunningBalance::new(student.id.clone(), end, time.now());
        for period in start.through(end) {
            for fee in resolver.resolve_for(student, period)?.fees {
                balance.adjust(&fee.code, -fee.amount);
            }
            for event in history.iter().filter(|p| p.year_month == period) {
                for entry in event.entries.iter().filter(|e| !self.config.is_exempt(&e.code)) {
                    balance.adjust(&entry.code, entry.amount);
                }
            }
        }
        Ok(balance)
    }

    /// credit a newly posted payment.
    ///
    /// When no balance is cached the recompute already includes the
    /// payment, provided the feed has recorded it.
    pub fn apply_payment(
        &self,
        id: &StudentId,
        entries: &[PaymentEntry],
        year_month: YearMonth,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BalanceUpdate> {
        if entries.is_empty() {
            return Err(LedgerError::EmptyPayment);
        }
        let Some(student) = self.lookup(id) else {
            return Ok(BalanceUpdate::StudentMissing);
        };

        // exempt codes never move the balance, matching the ledger's closing
        let credited: Vec<PaymentEntry> = entries
            .iter()
            .filter(|e| !self.config.is_exempt(&e.code))
            .cloned()
            .collect();
        let delta = entries_total(&credited);
        self.update(&student, year_month, delta, time, events, |balance| {
            for entry in &credited {
                balance.adjust(&entry.code, entry.amount);
            }
        })
    }

    /// charge an amount outside the monthly schedule, e.g. an
    /// administrative adjustment.
    ///
    /// `fee_items` break the charge down by code; whatever they do not
    /// cover is booked on the carry code.
    pub fn apply_debit(
        &self,
        id: &StudentId,
        amount: Money,
        fee_items: &[PaymentEntry],
        year_month: YearMonth,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BalanceUpdate> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount {
                code: self.config.carry_code.clone(),
                amount,
            });
        }
        let Some(student) = self.lookup(id) else {
            return Ok(BalanceUpdate::StudentMissing);
        };

        let itemised = entries_total(fee_items);
        let carry_code = self.config.carry_code.clone();
        let base = match self.cached_through(id, year_month) {
            Some(balance) => balance,
            None => match self.replay(&student, year_month, time) {
                Ok(balance) => balance,
                Err(e) => return Ok(self.mark_stale(id, &e, time, events)),
            },
        };

        let mut balance = base;
        for item in fee_items {
            balance.adjust(&item.code, -item.amount);
        }
        if itemised != amount {
            balance.adjust(&carry_code, itemised - amount);
        }
        self.finish(&student, year_month, balance, -amount, time, events)
    }

    fn update<F>(
        &self,
        student: &Student,
        year_month: YearMonth,
        delta: Money,
        time: &SafeTimeProvider,
        events: &mut EventStore,
        apply: F,
    ) -> Result<BalanceUpdate>
    where
        F: FnOnce(&mut RunningBalance),
    {
        let balance = match self.cached_through(&student.id, year_month) {
            Some(mut balance) => {
                apply(&mut balance);
                balance
            }
            None => match self.replay(student, year_month, time) {
                Ok(balance) => balance,
                Err(e) => return Ok(self.mark_stale(&student.id, &e, time, events)),
            },
        };
        self.finish(student, year_month, balance, delta, time, events)
    }

    /// refresh the advance summary against the period's fees and persist
    fn finish(
        &self,
        student: &Student,
        year_month: YearMonth,
        mut balance: RunningBalance,
        delta: Money,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BalanceUpdate> {
        let monthly_total = match FeeCatalogResolver::new(self.catalog).resolve_for(student, year_month) {
            Ok(schedule) => schedule.total(),
            Err(e) => return Ok(self.mark_stale(&student.id, &e, time, events)),
        };
        balance.advance = AdvanceSummary::compute(balance.balance, monthly_total);
        balance.updated_at = time.now();

        if let Err(e) = self.store.put_balance(&balance) {
            return Ok(self.mark_stale(&student.id, &e, time, events));
        }

        events.emit(LedgerEvent::BalanceAdjusted {
            student: student.id.clone(),
            delta,
            balance: balance.balance,
            timestamp: balance.updated_at,
        });
        Ok(BalanceUpdate::Updated(balance))
    }

    fn student(&self, id: &StudentId) -> Result<Student> {
        self.directory
            .get_student(id)?
            .ok_or_else(|| LedgerError::StudentNotFound { student: id.clone() })
    }

    fn lookup(&self, id: &StudentId) -> Option<Student> {
        match self.directory.get_student(id) {
            Ok(Some(student)) => Some(student),
            Ok(None) => {
                warn!(student = %id, "student not found, balance left untouched");
                None
            }
            Err(e) => {
                warn!(student = %id, error = %e, "student lookup failed, balance left untouched");
                None
            }
        }
    }

    fn cached(&self, id: &StudentId) -> Option<RunningBalance> {
        match self.store.get_balance(id) {
            Ok(balance) => balance,
            Err(e) => {
                warn!(student = %id, error = %e, "balance read failed, recomputing");
                None
            }
        }
    }

    /// cached balance, only when its dues already reach `year_month`; a
    /// balance behind the period is recomputed instead of adjusted
    fn cached_through(&self, id: &StudentId, year_month: YearMonth) -> Option<RunningBalance> {
        let balance = self.cached(id)?;
        if balance.through < year_month {
            debug!(student = %id, through = %balance.through, %year_month, "cached balance behind period, recomputing");
            return None;
        }
        Some(balance)
    }

    /// drop the cached balance so the next read recomputes it
    fn mark_stale(
        &self,
        id: &StudentId,
        cause: &LedgerError,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> BalanceUpdate {
        if let Err(e) = self.store.remove_balance(id) {
            warn!(student = %id, error = %e, "could not drop stale balance");
        }
        warn!(student = %id, error = %cause, "running balance is stale until the next recompute");
        let reason = cause.to_string();
        events.emit(LedgerEvent::BalanceStale {
            student: id.clone(),
            reason: reason.clone(),
            timestamp: time.now(),
        });
        BalanceUpdate::Stale { reason }
    }
}
