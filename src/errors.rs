use rust_decimal::Decimal;
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{FeeCode, StudentId, YearMonth};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("student not found: {student}")]
    StudentNotFound {
        student: StudentId,
    },

    #[error("ledger row not found for student {student} in {year_month}")]
    LedgerRowNotFound {
        student: StudentId,
        year_month: YearMonth,
    },

    #[error("ledger for {year_month} already built: {existing} rows present")]
    MonthAlreadyBuilt {
        year_month: YearMonth,
        existing: usize,
    },

    #[error("cannot distribute {balance}: monthly fee total is zero")]
    DivisionHazard {
        balance: Money,
    },

    #[error("cannot distribute {balance}: month count out of range")]
    AmountOverflow {
        balance: Money,
    },

    #[error("ledger partition for {year_month} is not provisioned")]
    PartitionMissing {
        year_month: YearMonth,
    },

    #[error("storage failure: {message}")]
    Storage {
        message: String,
    },

    #[error("invalid year-month: {value}")]
    InvalidYearMonth {
        value: String,
    },

    #[error("invalid percentage: {value}")]
    InvalidPercent {
        value: Decimal,
    },

    #[error("invalid payment amount for {code}: {amount}")]
    InvalidPaymentAmount {
        code: FeeCode,
        amount: Money,
    },

    #[error("payment event carries no entries")]
    EmptyPayment,

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LedgerError {
    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    /// absent student or ledger row
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::StudentNotFound { .. } | LedgerError::LedgerRowNotFound { .. }
        )
    }

    /// the bulk build found rows already present for the month
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::MonthAlreadyBuilt { .. })
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::storage(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::storage(format!("json: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
