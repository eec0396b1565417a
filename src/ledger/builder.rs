use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::balance::RunningBalanceService;
use crate::catalog::{FeeCatalogResolver, FeeSchedule};
use crate::config::LedgerConfig;
use crate::distribution::AdvancePaymentDistributor;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::store::{LedgerStore, PaymentFeed, StudentDirectory, TuitionCatalog};
use crate::types::{Student, StudentId, YearMonth};

use super::{closing_balance, LedgerAmount, LedgerRow};

/// outcome of a bulk month build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthBuildReport {
    pub year_month: YearMonth,
    pub inserted: usize,
    /// rows already present when their insert ran
    pub skipped: usize,
    /// active students left out as graduated
    pub excluded: usize,
}

/// creates ledger rows, in bulk for a month or one student at a time
pub struct MonthlyLedgerBuilder<'a> {
    config: &'a LedgerConfig,
    directory: &'a dyn StudentDirectory,
    catalog: &'a dyn TuitionCatalog,
    payments: &'a dyn PaymentFeed,
    ledger: &'a dyn LedgerStore,
    balances: &'a RunningBalanceService<'a>,
    distributor: AdvancePaymentDistributor,
}

impl<'a> MonthlyLedgerBuilder<'a> {
    pub fn new(
        config: &'a LedgerConfig,
        directory: &'a dyn StudentDirectory,
        catalog: &'a dyn TuitionCatalog,
        payments: &'a dyn PaymentFeed,
        ledger: &'a dyn LedgerStore,
        balances: &'a RunningBalanceService<'a>,
    ) -> Self {
        Self {
            config,
            directory,
            catalog,
            payments,
            ledger,
            balances,
            distributor: AdvancePaymentDistributor::new(),
        }
    }

    /// build every active student's row for `year_month`.
    ///
    /// Refuses with [`LedgerError::MonthAlreadyBuilt`] when the month
    /// already has rows. Each row insert is atomic on its own; a run that
    /// stops half way can be completed with [`Self::insert_student`].
    pub fn build_month(
        &self,
        year_month: YearMonth,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<MonthBuildReport> {
        let existing = self.ledger.count_month(year_month)?;
        if existing > 0 {
            warn!(%year_month, existing, "month already built");
            return Err(LedgerError::MonthAlreadyBuilt { year_month, existing });
        }
        self.ledger.ensure_partition(year_month)?;

        let (students, graduated): (Vec<Student>, Vec<Student>) = self
            .directory
            .active_students()?
            .into_iter()
            .partition(|s| s.grade != self.config.graduated_grade);

        let mut report = MonthBuildReport {
            year_month,
            inserted: 0,
            skipped: 0,
            excluded: graduated.len(),
        };

        for chunk in students.chunks(self.config.batch_size) {
            let rows = chunk
                .iter()
                .map(|student| self.compose_row(student, year_month, time))
                .collect::<Result<Vec<_>>>()?;

            for row in &rows {
                if self.ledger.insert_if_absent(row)? {
                    report.inserted += 1;
                    emit_inserted(row, time, events);
                } else {
                    report.skipped += 1;
                    warn!(student = %row.student, %year_month, "row already present, skipped");
                }
            }
            debug!(%year_month, batch = rows.len(), "ledger batch written");
        }

        info!(
            %year_month,
            inserted = report.inserted,
            skipped = report.skipped,
            excluded = report.excluded,
            "month ledger built"
        );
        events.emit(LedgerEvent::MonthBuilt {
            year_month,
            inserted: report.inserted,
            skipped: report.skipped,
            timestamp: time.now(),
        });
        Ok(report)
    }

    /// create one student's row for `year_month`, e.g. on mid-cycle
    /// enrollment. An existing row is returned unchanged; the month's
    /// partition is provisioned as in [`Self::build_month`].
    pub fn insert_student(
        &self,
        id: &StudentId,
        year_month: YearMonth,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<LedgerRow> {
        let student = self
            .directory
            .get_student(id)?
            .ok_or_else(|| LedgerError::StudentNotFound { student: id.clone() })?;

        if let Some(existing) = self.ledger.get(id, year_month)? {
            debug!(student = %id, %year_month, "row exists, returning it");
            return Ok(existing);
        }

        self.ledger.ensure_partition(year_month)?;
        let row = self.compose_row(&student, year_month, time)?;
        if self.ledger.insert_if_absent(&row)? {
            info!(student = %id, %year_month, "student row inserted");
            emit_inserted(&row, time, events);
            return Ok(row);
        }

        // lost a race with a concurrent insert
        self.ledger
            .get(id, year_month)?
            .ok_or_else(|| LedgerError::LedgerRowNotFound {
                student: id.clone(),
                year_month,
            })
    }

    /// compute a student's row without writing it
    pub fn compose_row(
        &self,
        student: &Student,
        year_month: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<LedgerRow> {
        let schedule = FeeCatalogResolver::new(self.catalog).resolve_for(student, year_month)?;
        let assessed = schedule.as_due();

        let mut paid = LedgerAmount::new();
        let mut invoice_ids = Vec::new();
        for payment in self.payments.payments_for_student_month(&student.id, year_month)? {
            for entry in &payment.entries {
                paid.add(&entry.code, entry.amount);
            }
            if !invoice_ids.contains(&payment.invoice_id) {
                invoice_ids.push(payment.invoice_id);
            }
        }

        let opening = match self.ledger.get(&student.id, year_month.prev())? {
            Some(previous) => {
                let mut carried = previous.closing;
                carried.settle_on(&self.config.carry_code);
                carried
            }
            None => self.first_opening(student, year_month, &schedule, time)?,
        };

        let closing = closing_balance(&opening, &paid, &assessed, &self.config.exempt_codes);
        let due = outstanding(&assessed, &paid);
        let now = time.now();

        Ok(LedgerRow {
            id: Uuid::new_v4(),
            student: student.id.clone(),
            student_name: student.name.clone(),
            year_month,
            tuitions: schedule.codes(),
            opening,
            assessed,
            due,
            paid,
            closing,
            invoice_ids,
            created_at: now,
            updated_at: now,
        })
    }

    /// opening for a student's first month on record: the balance carried
    /// into the month, spread over this month's fees
    fn first_opening(
        &self,
        student: &Student,
        year_month: YearMonth,
        schedule: &FeeSchedule,
        time: &SafeTimeProvider,
    ) -> Result<LedgerAmount> {
        let balance = self.balances.balance_before(student, year_month, time)?;

        if balance.is_negative() {
            // debt is booked whole on one code so the total keeps its breakdown
            let code = schedule
                .primary()
                .or_else(|| schedule.fees.first())
                .map(|fee| fee.code.clone())
                .unwrap_or_else(|| self.config.carry_code.clone());
            return Ok(LedgerAmount::from_details([(code, balance)]));
        }

        let distribution = self.distributor.distribute(balance, schedule);
        debug!(
            student = %student.id,
            %balance,
            advance_months = distribution.advance_months,
            "opening balance distributed"
        );
        Ok(distribution.as_opening())
    }
}

/// still outstanding per code once `paid` is applied, never negative
fn outstanding(assessed: &LedgerAmount, paid: &LedgerAmount) -> LedgerAmount {
    let mut due = LedgerAmount::new();
    for (code, amount) in &assessed.details {
        due.set_detail(code, amount.saturating_sub(paid.get(code)));
    }
    due.recompute_total();
    due
}

fn emit_inserted(row: &LedgerRow, time: &SafeTimeProvider, events: &mut EventStore) {
    events.emit(LedgerEvent::StudentRowInserted {
        student: row.student.clone(),
        year_month: row.year_month,
        opening: row.opening.total,
        due: row.due.total,
        timestamp: time.now(),
    });
}
