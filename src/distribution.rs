use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::catalog::FeeSchedule;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::LedgerAmount;
use crate::types::FeeCode;

/// how far a credit balance reaches into future months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvanceSummary {
    pub advance_months: u32,
    pub monthly_fee_total: Money,
    pub remainder: Money,
}

impl AdvanceSummary {
    /// whole months covered by `balance` at `monthly_fee_total` per month.
    ///
    /// A zero fee total or a non-positive balance covers no months and
    /// leaves the whole balance as remainder.
    pub fn compute(balance: Money, monthly_fee_total: Money) -> Self {
        let advance_months = if balance.is_positive() {
            balance.whole_multiples_of(monthly_fee_total).unwrap_or(0)
        } else {
            0
        };
        Self {
            advance_months,
            monthly_fee_total,
            remainder: balance - monthly_fee_total.times(advance_months),
        }
    }

    /// e.g. `"2 months + 250.000"`
    pub fn describe(&self, scale: u32) -> String {
        format!(
            "{} months + {}",
            self.advance_months,
            self.remainder.to_display(scale)
        )
    }
}

/// breakdown of a lump balance across fee codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub by_code: BTreeMap<FeeCode, Money>,
    pub advance_months: u32,
    pub monthly_fee_total: Money,
    pub remainder: Money,
}

impl Distribution {
    fn zeroed(schedule: &FeeSchedule, balance: Money) -> Self {
        Self {
            by_code: schedule.fees.iter().map(|f| (f.code.clone(), Money::ZERO)).collect(),
            advance_months: 0,
            monthly_fee_total: schedule.total(),
            remainder: balance,
        }
    }

    /// sum of the per-code shares
    pub fn distributed(&self) -> Money {
        self.by_code.values().sum()
    }

    pub fn summary(&self) -> AdvanceSummary {
        AdvanceSummary {
            advance_months: self.advance_months,
            monthly_fee_total: self.monthly_fee_total,
            remainder: self.remainder,
        }
    }

    /// shares as an opening balance, zero codes pruned
    pub fn as_opening(&self) -> LedgerAmount {
        LedgerAmount::from_details(self.by_code.iter().map(|(c, m)| (c.clone(), *m)))
    }
}

/// spreads a credit balance over a student's monthly fee schedule
#[derive(Debug, Default, Clone, Copy)]
pub struct AdvancePaymentDistributor;

impl AdvancePaymentDistributor {
    pub fn new() -> Self {
        Self
    }

    /// distribute `balance` across the schedule's codes.
    ///
    /// Never fails: a positive balance against a zero fee total yields a
    /// zero distribution.
    pub fn distribute(&self, balance: Money, schedule: &FeeSchedule) -> Distribution {
        match self.try_distribute(balance, schedule) {
            Ok(distribution) => distribution,
            Err(LedgerError::DivisionHazard { balance }) => {
                warn!(%balance, "monthly fee total is zero, balance left undistributed");
                Distribution::zeroed(schedule, balance)
            }
            Err(e) => {
                warn!(error = %e, "distribution failed, balance left undistributed");
                Distribution::zeroed(schedule, balance)
            }
        }
    }

    /// distribute, reporting a zero fee total as [`LedgerError::DivisionHazard`]
    /// and a month count beyond `u32` as [`LedgerError::AmountOverflow`]
    pub fn try_distribute(&self, balance: Money, schedule: &FeeSchedule) -> Result<Distribution> {
        let mut distribution = Distribution::zeroed(schedule, balance);
        if !balance.is_positive() {
            return Ok(distribution);
        }

        let primary = schedule.primary();

        // a partial balance below one month of tuition goes to tuition first
        if let Some(primary) = primary {
            if balance < primary.amount {
                distribution.by_code.insert(primary.code.clone(), balance);
                debug!(%balance, code = %primary.code, "balance below one month of tuition");
                return Ok(distribution);
            }
        }

        let monthly_fee_total = schedule.total();
        if monthly_fee_total.is_zero() {
            return Err(LedgerError::DivisionHazard { balance });
        }
        let advance_months = balance
            .whole_multiples_of(monthly_fee_total)
            .ok_or(LedgerError::AmountOverflow { balance })?;
        let remainder = balance - monthly_fee_total.times(advance_months);

        for fee in &schedule.fees {
            *distribution.by_code.entry(fee.code.clone()).or_insert(Money::ZERO) +=
                fee.amount.times(advance_months);
        }

        if remainder.is_positive() {
            match primary {
                Some(primary) if remainder < primary.amount => {
                    *distribution.by_code.entry(primary.code.clone()).or_insert(Money::ZERO) += remainder;
                }
                _ => spread_proportionally(&mut distribution.by_code, schedule, remainder, monthly_fee_total)?,
            }
        }

        distribution.advance_months = advance_months;
        distribution.remainder = remainder;
        Ok(distribution)
    }
}

/// share `remainder` by each fee's weight; the last weighted fee absorbs
/// the rounding residue so the shares sum exactly to `remainder`
fn spread_proportionally(
    by_code: &mut BTreeMap<FeeCode, Money>,
    schedule: &FeeSchedule,
    remainder: Money,
    monthly_fee_total: Money,
) -> Result<()> {
    let weighted: Vec<_> = schedule.fees.iter().filter(|f| f.amount.is_positive()).collect();
    let Some((last, rest)) = weighted.split_last() else {
        return Err(LedgerError::DivisionHazard { balance: remainder });
    };

    let mut allocated = Money::ZERO;
    for fee in rest {
        let ratio = fee
            .amount
            .ratio(monthly_fee_total)
            .ok_or(LedgerError::DivisionHazard { balance: remainder })?;
        let share = remainder * ratio;
        *by_code.entry(fee.code.clone()).or_insert(Money::ZERO) += share;
        allocated += share;
    }
    *by_code.entry(last.code.clone()).or_insert(Money::ZERO) += remainder - allocated;
    Ok(())
}
