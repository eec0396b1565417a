pub mod balance;
pub mod catalog;
pub mod config;
pub mod decimal;
pub mod distribution;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod reports;
pub mod store;
pub mod types;

// re-export key types
pub use balance::{BalanceUpdate, RunningBalance, RunningBalanceService};
pub use catalog::{FeeCatalogResolver, FeeSchedule, ResolvedFee};
pub use config::LedgerConfig;
pub use decimal::{Money, Percent};
pub use distribution::{AdvancePaymentDistributor, AdvanceSummary, Distribution};
pub use engine::{Collaborators, PaymentOutcome, TuitionLedger};
pub use errors::{LedgerError, Result};
pub use events::{EventStore, LedgerEvent};
pub use ledger::{
    IncrementalUpdater, LedgerAmount, LedgerRow, MonthBuildReport, MonthlyLedgerBuilder,
    PaymentApplication,
};
pub use reports::{MonthSummary, MonthSummaryLine, StudentStatement};
pub use store::{
    BalanceStore, LedgerStore, MemoryStore, PaymentFeed, SqliteLedgerStore, StudentDirectory,
    TuitionCatalog,
};
pub use types::{
    FeeCode, FeeDefinition, FeeGroup, InvoiceId, MonthSet, PaymentEntry, PaymentEvent, Student,
    StudentId, YearMonth,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
