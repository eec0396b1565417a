use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{InvoiceId, StudentId, YearMonth};

/// all events that can be emitted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // monthly ledger events
    MonthBuilt {
        year_month: YearMonth,
        inserted: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
    StudentRowInserted {
        student: StudentId,
        year_month: YearMonth,
        opening: Money,
        due: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentApplied {
        student: StudentId,
        year_month: YearMonth,
        invoice_id: InvoiceId,
        amount: Money,
        closing: Money,
        timestamp: DateTime<Utc>,
    },
    YearPurged {
        year: i32,
        rows: usize,
        timestamp: DateTime<Utc>,
    },

    // running balance events
    BalanceRecomputed {
        student: StudentId,
        through: YearMonth,
        balance: Money,
        timestamp: DateTime<Utc>,
    },
    BalanceAdjusted {
        student: StudentId,
        delta: Money,
        balance: Money,
        timestamp: DateTime<Utc>,
    },
    BalanceStale {
        student: StudentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LedgerEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
