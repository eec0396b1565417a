use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::{LedgerError, Result};
use crate::types::FeeCode;

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// grade sentinel for graduated students, skipped by the monthly build
    pub graduated_grade: String,
    /// fee codes whose payments do not move the closing balance
    pub exempt_codes: BTreeSet<FeeCode>,
    /// code that carries a debt when no fee applies in the month
    pub carry_code: FeeCode,
    /// students per insert batch during the monthly build
    pub batch_size: usize,
    /// first month of the school cycle used when replaying history
    pub cycle_start_month: u32,
    /// decimal places shown in statements
    pub display_scale: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            graduated_grade: "LT".to_string(),
            exempt_codes: [FeeCode::new("OT")].into_iter().collect(),
            carry_code: FeeCode::new("CARRY"),
            batch_size: 200,
            cycle_start_month: 6,
            display_scale: 0,
        }
    }
}

impl LedgerConfig {
    /// load from json, missing keys fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json).map_err(|e| {
            LedgerError::InvalidConfiguration {
                message: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "batch_size must be positive".to_string(),
            });
        }
        if !(1..=12).contains(&self.cycle_start_month) {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("cycle_start_month {} is not a month", self.cycle_start_month),
            });
        }
        if self.graduated_grade.trim().is_empty() {
            return Err(LedgerError::InvalidConfiguration {
                message: "graduated_grade must not be empty".to_string(),
            });
        }
        if self.carry_code.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidConfiguration {
                message: "carry_code must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_exempt(&self, code: &FeeCode) -> bool {
        self.exempt_codes.contains(code)
    }

    pub fn with_exempt_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_codes = codes.into_iter().map(FeeCode::new).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_graduated_grade(mut self, grade: impl Into<String>) -> Self {
        self.graduated_grade = grade.into();
        self
    }
}
