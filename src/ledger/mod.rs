pub mod builder;
pub mod updater;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{FeeCode, InvoiceId, StudentId, YearMonth};

pub use builder::{MonthBuildReport, MonthlyLedgerBuilder};
pub use updater::{IncrementalUpdater, PaymentApplication};

/// amount with a per-fee-code breakdown
///
/// Zero entries are pruned from `details`; `total` is the sum of the
/// breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerAmount {
    #[serde(default, alias = "totalamount", alias = "totalPaidAmount")]
    pub total: Money,
    #[serde(default)]
    pub details: BTreeMap<FeeCode, Money>,
}

impl LedgerAmount {
    pub fn new() -> Self {
        Self::default()
    }

    /// build from a breakdown, pruning zeros
    pub fn from_details<I>(details: I) -> Self
    where
        I: IntoIterator<Item = (FeeCode, Money)>,
    {
        let mut amount = Self::new();
        for (code, value) in details {
            amount.add(&code, value);
        }
        amount
    }

    pub fn get(&self, code: &FeeCode) -> Money {
        self.details.get(code).copied().unwrap_or(Money::ZERO)
    }

    /// add to one code and to the total
    pub fn add(&mut self, code: &FeeCode, value: Money) {
        let entry = self.details.entry(code.clone()).or_insert(Money::ZERO);
        *entry += value;
        if entry.is_zero() {
            self.details.remove(code);
        }
        self.total += value;
    }

    /// overwrite one code, leaving the total for [`Self::recompute_total`]
    pub fn set_detail(&mut self, code: &FeeCode, value: Money) {
        if value.is_zero() {
            self.details.remove(code);
        } else {
            self.details.insert(code.clone(), value);
        }
    }

    pub fn recompute_total(&mut self) {
        self.total = self.details.values().sum();
    }

    pub fn details_sum(&self) -> Money {
        self.details.values().sum()
    }

    pub fn codes(&self) -> impl Iterator<Item = &FeeCode> {
        self.details.keys()
    }

    pub fn is_zero(&self) -> bool {
        self.total.is_zero() && self.details.is_empty()
    }

    /// book any gap between `total` and the breakdown on `code`, leaving
    /// `total` as it was. Legacy amounts carry a total with no breakdown.
    pub fn settle_on(&mut self, code: &FeeCode) {
        let gap = self.total - self.details_sum();
        if gap.is_zero() {
            return;
        }
        let entry = self.details.entry(code.clone()).or_insert(Money::ZERO);
        *entry += gap;
        if entry.is_zero() {
            self.details.remove(code);
        }
    }
}

/// one student's ledger for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub id: Uuid,
    #[serde(rename = "mshs")]
    pub student: StudentId,
    pub student_name: String,
    pub year_month: YearMonth,
    /// fee codes applicable this month
    pub tuitions: Vec<FeeCode>,
    /// opening balance carried in
    #[serde(rename = "dudau")]
    pub opening: LedgerAmount,
    /// net due at build time, never changed afterwards
    pub assessed: LedgerAmount,
    /// due still outstanding
    #[serde(rename = "phaithu")]
    pub due: LedgerAmount,
    /// paid this month
    #[serde(rename = "dathu")]
    pub paid: LedgerAmount,
    /// closing balance, positive means the student is in credit
    #[serde(rename = "duno")]
    pub closing: LedgerAmount,
    pub invoice_ids: Vec<InvoiceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRow {
    /// comma-joined applicable codes, as shown in listings
    pub fn tuitions_joined(&self) -> String {
        self.tuitions
            .iter()
            .map(FeeCode::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// give every amount a breakdown that sums to its total
    pub fn settle_gaps(&mut self, code: &FeeCode) {
        for amount in [
            &mut self.opening,
            &mut self.assessed,
            &mut self.due,
            &mut self.paid,
            &mut self.closing,
        ] {
            amount.settle_on(code);
        }
    }

    /// record an invoice once
    pub fn link_invoice(&mut self, invoice_id: InvoiceId) {
        if !self.invoice_ids.contains(&invoice_id) {
            self.invoice_ids.push(invoice_id);
        }
    }

    /// codes whose closing balance disagrees with
    /// `opening + credited paid - assessed`
    pub fn formula_violations(&self, exempt: &BTreeSet<FeeCode>) -> Vec<FeeCode> {
        let expected = closing_balance(&self.opening, &self.paid, &self.assessed, exempt);
        let mut codes: BTreeSet<&FeeCode> = BTreeSet::new();
        codes.extend(self.opening.codes());
        codes.extend(self.assessed.codes());
        codes.extend(self.paid.codes());
        codes.extend(self.closing.codes());

        codes
            .into_iter()
            .filter(|code| expected.get(code) != self.closing.get(code))
            .cloned()
            .collect()
    }

    /// per-code formula holds, totals match breakdowns, nothing outstanding is negative
    pub fn is_consistent(&self, exempt: &BTreeSet<FeeCode>) -> bool {
        self.formula_violations(exempt).is_empty()
            && self.closing.total == self.closing.details_sum()
            && self.due.total == self.due.details_sum()
            && self.due.details.values().all(|v| !v.is_negative())
    }
}

/// closing balance per code: `opening + paid - assessed`, where payments
/// on exempt codes are not credited
pub fn closing_balance(
    opening: &LedgerAmount,
    paid: &LedgerAmount,
    assessed: &LedgerAmount,
    exempt: &BTreeSet<FeeCode>,
) -> LedgerAmount {
    let mut closing = LedgerAmount::new();
    for (code, value) in &opening.details {
        closing.add(code, *value);
    }
    for (code, value) in &paid.details {
        if !exempt.contains(code) {
            closing.add(code, *value);
        }
    }
    for (code, value) in &assessed.details {
        closing.add(code, -*value);
    }
    closing.recompute_total();
    closing
}
