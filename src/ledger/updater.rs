use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::store::LedgerStore;
use crate::types::{entries_total, InvoiceId, PaymentEntry, StudentId, YearMonth};

use super::LedgerRow;

/// result of folding one payment into a ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub invoice_id: InvoiceId,
    pub amount: Money,
    /// the row as persisted
    pub row: LedgerRow,
}

/// applies posted payments to existing ledger rows
pub struct IncrementalUpdater<'a> {
    config: &'a LedgerConfig,
    ledger: &'a dyn LedgerStore,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(config: &'a LedgerConfig, ledger: &'a dyn LedgerStore) -> Self {
        Self { config, ledger }
    }

    /// fold a payment's entries into the (student, month) row.
    ///
    /// All field updates land together or not at all; a missing row is
    /// [`LedgerError::LedgerRowNotFound`].
    pub fn apply(
        &self,
        student: &StudentId,
        year_month: YearMonth,
        entries: &[PaymentEntry],
        invoice_id: InvoiceId,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentApplication> {
        validate_entries(entries)?;
        let now = time.now();

        let row = self.ledger.update_atomic(student, year_month, &mut |row: &mut LedgerRow| -> Result<()> {
            row.settle_gaps(&self.config.carry_code);
            apply_entries(row, entries, self.config);
            row.link_invoice(invoice_id);
            row.updated_at = now;
            Ok(())
        })?;

        let amount = entries_total(entries);
        info!(
            %student,
            %year_month,
            invoice_id,
            %amount,
            closing = %row.closing.total,
            "payment applied to ledger"
        );
        events.emit(LedgerEvent::PaymentApplied {
            student: student.clone(),
            year_month,
            invoice_id,
            amount,
            closing: row.closing.total,
            timestamp: now,
        });

        Ok(PaymentApplication {
            invoice_id,
            amount,
            row,
        })
    }
}

/// reject empty payments and non-positive amounts
pub fn validate_entries(entries: &[PaymentEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(LedgerError::EmptyPayment);
    }
    match entries.iter().find(|e| !e.amount.is_positive()) {
        Some(bad) => Err(LedgerError::InvalidPaymentAmount {
            code: bad.code.clone(),
            amount: bad.amount,
        }),
        None => Ok(()),
    }
}

fn apply_entries(row: &mut LedgerRow, entries: &[PaymentEntry], config: &LedgerConfig) {
    for entry in entries {
        row.paid.add(&entry.code, entry.amount);

        let outstanding = row.due.get(&entry.code);
        if outstanding.is_positive() {
            row.due.set_detail(&entry.code, outstanding.saturating_sub(entry.amount));
        }

        if !config.is_exempt(&entry.code) {
            row.closing.add(&entry.code, entry.amount);
        }
    }
    row.due.recompute_total();
    row.closing.recompute_total();
}
