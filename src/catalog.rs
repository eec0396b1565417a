use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Percent};
use crate::errors::Result;
use crate::ledger::LedgerAmount;
use crate::store::TuitionCatalog;
use crate::types::{FeeCode, FeeDefinition, FeeGroup, Student, YearMonth};

/// fee applicable to one student in one month, discount already applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFee {
    pub code: FeeCode,
    pub name: String,
    pub amount: Money,
    pub group: FeeGroup,
}

/// ordered list of resolved fees for a month
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub fees: Vec<ResolvedFee>,
}

impl FeeSchedule {
    pub fn total(&self) -> Money {
        self.fees.iter().map(|f| f.amount).sum()
    }

    /// first primary-tuition fee, if the month carries one
    pub fn primary(&self) -> Option<&ResolvedFee> {
        self.fees.iter().find(|f| f.group == FeeGroup::PrimaryTuition)
    }

    pub fn codes(&self) -> Vec<FeeCode> {
        self.fees.iter().map(|f| f.code.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }

    /// the schedule as a due amount broken down by code
    pub fn as_due(&self) -> LedgerAmount {
        LedgerAmount::from_details(self.fees.iter().map(|f| (f.code.clone(), f.amount)))
    }

    /// same fees with primary tuition first, for display
    pub fn display_order(&self) -> Vec<&ResolvedFee> {
        let mut ordered: Vec<&ResolvedFee> = self.fees.iter().collect();
        ordered.sort_by_key(|f| f.group != FeeGroup::PrimaryTuition);
        ordered
    }
}

/// resolves which catalog fees apply to a student in a month
pub struct FeeCatalogResolver<'a> {
    catalog: &'a dyn TuitionCatalog,
}

impl<'a> FeeCatalogResolver<'a> {
    pub fn new(catalog: &'a dyn TuitionCatalog) -> Self {
        Self { catalog }
    }

    /// resolve fees for a grade and calendar month
    pub fn resolve(
        &self,
        grade: &str,
        month: u32,
        boarding: bool,
        discount: Percent,
    ) -> Result<FeeSchedule> {
        let definitions = self.catalog.fee_definitions(grade)?;
        Ok(resolve_definitions(&definitions, grade, month, boarding, discount))
    }

    /// resolve fees for a student in a ledger period
    pub fn resolve_for(&self, student: &Student, year_month: YearMonth) -> Result<FeeSchedule> {
        self.resolve(
            &student.grade,
            year_month.month(),
            student.boarding,
            student.discount,
        )
    }
}

/// pure resolution over already-loaded catalog entries
pub fn resolve_definitions(
    definitions: &[FeeDefinition],
    grade: &str,
    month: u32,
    boarding: bool,
    discount: Percent,
) -> FeeSchedule {
    let fees = definitions
        .iter()
        .filter(|d| d.grade == grade && d.months.contains(month))
        .filter(|d| boarding || d.group != FeeGroup::Boarding)
        .map(|d| {
            let amount = match d.group {
                FeeGroup::PrimaryTuition => discount.discount(d.amount),
                _ => d.amount,
            };
            ResolvedFee {
                code: d.code.clone(),
                name: d.name.clone(),
                amount,
                group: d.group,
            }
        })
        .collect();

    FeeSchedule { fees }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonthSet;

    fn catalog() -> Vec<FeeDefinition> {
        vec![
            FeeDefinition::new("NT06", "Boarding", Money::from_major(200_000), "6", MonthSet::all(), FeeGroup::Boarding),
            FeeDefinition::new("HP06", "Tuition", Money::from_major(1_000_000), "6", MonthSet::all(), FeeGroup::PrimaryTuition),
            FeeDefinition::new("BT06", "Books", Money::from_major(150_000), "6", MonthSet::parse("9"), FeeGroup::Other),
            FeeDefinition::new("XX06", "Broken", Money::from_major(10), "6", MonthSet::parse(""), FeeGroup::Other),
            FeeDefinition::new("HP07", "Tuition", Money::from_major(1_100_000), "7", MonthSet::all(), FeeGroup::PrimaryTuition),
        ]
    }

    #[test]
    fn test_discount_applies_to_primary_tuition_only() {
        let discount = Percent::from_whole(20).unwrap();
        let schedule = resolve_definitions(&catalog(), "6", 9, true, discount);

        assert_eq!(schedule.codes(), vec![FeeCode::new("NT06"), FeeCode::new("HP06"), FeeCode::new("BT06")]);
        assert_eq!(schedule.primary().unwrap().amount, Money::from_major(800_000));
        assert_eq!(schedule.fees[0].amount, Money::from_major(200_000));
        assert_eq!(schedule.fees[2].amount, Money::from_major(150_000));
        assert_eq!(schedule.total(), Money::from_major(1_150_000));
    }

    #[test]
    fn test_day_students_skip_boarding_fees() {
        let schedule = resolve_definitions(&catalog(), "6", 3, false, Percent::ZERO);
        assert_eq!(schedule.codes(), vec![FeeCode::new("HP06")]);
    }

    #[test]
    fn test_unknown_grade_resolves_empty() {
        let schedule = resolve_definitions(&catalog(), "12", 3, true, Percent::ZERO);
        assert!(schedule.is_empty());
        assert_eq!(schedule.total(), Money::ZERO);
        assert!(schedule.primary().is_none());
    }

    #[test]
    fn test_display_order_puts_primary_first() {
        let schedule = resolve_definitions(&catalog(), "6", 9, true, Percent::ZERO);
        let order: Vec<&str> = schedule.display_order().iter().map(|f| f.code.as_str()).collect();
        assert_eq!(order, vec!["HP06", "NT06", "BT06"]);
    }
}
