use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::decimal::{Money, Percent};
use crate::errors::{LedgerError, Result};

/// stable student identifier (mshs), e.g. `"100001"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        StudentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId::new(s)
    }
}

/// fee code from the tuition catalog, e.g. `"HP06"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeCode(String);

impl FeeCode {
    pub fn new(code: impl Into<String>) -> Self {
        FeeCode(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeeCode {
    fn from(s: &str) -> Self {
        FeeCode::new(s)
    }
}

/// invoice identifier assigned by the invoicing system
pub type InvoiceId = u64;

/// ledger period key, rendered as `"YYYY-MM"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(LedgerError::InvalidYearMonth {
                value: format!("{}-{}", year, month),
            });
        }
        Ok(Self { year, month })
    }

    /// period containing the given date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// period containing the given instant
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self::from_date(at.date_naive())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// calendar month, 1-12
    pub fn month(&self) -> u32 {
        self.month
    }

    /// previous period, rolling back over January
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// next period, rolling over December
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// all periods from `self` through `end`, inclusive
    pub fn through(self, end: YearMonth) -> impl Iterator<Item = YearMonth> {
        std::iter::successors(Some(self), move |ym| {
            let next = ym.next();
            (next <= end).then_some(next)
        })
        .take_while(move |ym| *ym <= end)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::InvalidYearMonth { value: s.to_string() };
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        YearMonth::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for YearMonth {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<YearMonth> for String {
    fn from(ym: YearMonth) -> Self {
        ym.to_string()
    }
}

/// set of calendar months (1-12) a fee applies to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonthSet(BTreeSet<u32>);

impl MonthSet {
    pub fn new(months: impl IntoIterator<Item = u32>) -> Self {
        MonthSet(months.into_iter().filter(|m| (1..=12).contains(m)).collect())
    }

    pub fn all() -> Self {
        Self::new(1..=12)
    }

    /// parse the catalog's comma-joined form, e.g. `"1,2,9,10"`.
    ///
    /// Tokens that are not a month number are dropped; a missing or
    /// fully unparseable value yields an empty set.
    pub fn parse(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .filter_map(|token| token.trim().parse::<u32>().ok()),
        )
    }

    pub fn contains(&self, month: u32) -> bool {
        self.0.contains(&month)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

/// catalog group tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeGroup {
    /// primary tuition (HP), the only group discounts apply to
    #[serde(rename = "HP")]
    PrimaryTuition,
    /// boarding (NT), billed only to boarding students
    #[serde(rename = "NT")]
    Boarding,
    #[serde(other)]
    Other,
}

impl FeeGroup {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "HP" => FeeGroup::PrimaryTuition,
            "NT" => FeeGroup::Boarding,
            _ => FeeGroup::Other,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FeeGroup::PrimaryTuition => "HP",
            FeeGroup::Boarding => "NT",
            FeeGroup::Other => "OTHER",
        }
    }
}

/// student directory entry, read-only to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub grade: String,
    pub boarding: bool,
    pub discount: Percent,
    pub active: bool,
}

impl Student {
    pub fn new(id: impl Into<String>, name: impl Into<String>, grade: impl Into<String>) -> Self {
        Self {
            id: StudentId::new(id),
            name: name.into(),
            grade: grade.into(),
            boarding: false,
            discount: Percent::ZERO,
            active: true,
        }
    }

    pub fn boarding(mut self, boarding: bool) -> Self {
        self.boarding = boarding;
        self
    }

    pub fn discount(mut self, discount: Percent) -> Self {
        self.discount = discount;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// tuition catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeDefinition {
    pub code: FeeCode,
    pub name: String,
    pub amount: Money,
    pub grade: String,
    pub months: MonthSet,
    pub group: FeeGroup,
}

impl FeeDefinition {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        amount: Money,
        grade: impl Into<String>,
        months: MonthSet,
        group: FeeGroup,
    ) -> Self {
        Self {
            code: FeeCode::new(code),
            name: name.into(),
            amount,
            grade: grade.into(),
            months,
            group,
        }
    }
}

/// one fee-code/amount pair of a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub code: FeeCode,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PaymentEntry {
    pub fn new(code: impl Into<String>, amount: Money) -> Self {
        Self {
            code: FeeCode::new(code),
            amount,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// sum of entry amounts
pub fn entries_total(entries: &[PaymentEntry]) -> Money {
    entries.iter().map(|e| e.amount).sum()
}

/// payments posted against one invoice, assigned to one ledger period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub student: StudentId,
    pub invoice_id: InvoiceId,
    pub year_month: YearMonth,
    pub entries: Vec<PaymentEntry>,
    pub posted_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn total(&self) -> Money {
        entries_total(&self.entries)
    }
}
