use hourglass_rs::{SafeTimeProvider, TimeSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::balance::{BalanceUpdate, RunningBalance, RunningBalanceService};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{EventStore, LedgerEvent};
use crate::ledger::{
    IncrementalUpdater, LedgerRow, MonthBuildReport, MonthlyLedgerBuilder, PaymentApplication,
};
use crate::reports::{self, MonthSummary, StudentStatement};
use crate::store::{BalanceStore, LedgerStore, PaymentFeed, StudentDirectory, TuitionCatalog};
use crate::types::{InvoiceId, PaymentEntry, StudentId, YearMonth};

/// handles to every collaborator the ledger talks to
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn StudentDirectory>,
    pub catalog: Arc<dyn TuitionCatalog>,
    pub payments: Arc<dyn PaymentFeed>,
    pub ledger: Arc<dyn LedgerStore>,
    pub balances: Arc<dyn BalanceStore>,
}

impl Collaborators {
    /// one backend serving every role
    pub fn single<S>(store: Arc<S>) -> Self
    where
        S: StudentDirectory + TuitionCatalog + PaymentFeed + LedgerStore + BalanceStore + 'static,
    {
        Self {
            directory: store.clone(),
            catalog: store.clone(),
            payments: store.clone(),
            ledger: store.clone(),
            balances: store,
        }
    }

    fn builder<'a>(
        &'a self,
        config: &'a LedgerConfig,
        balances: &'a RunningBalanceService<'a>,
    ) -> MonthlyLedgerBuilder<'a> {
        MonthlyLedgerBuilder::new(
            config,
            self.directory.as_ref(),
            self.catalog.as_ref(),
            self.payments.as_ref(),
            self.ledger.as_ref(),
            balances,
        )
    }

    fn balance_service<'a>(&'a self, config: &'a LedgerConfig) -> RunningBalanceService<'a> {
        RunningBalanceService::new(
            config,
            self.directory.as_ref(),
            self.catalog.as_ref(),
            self.payments.as_ref(),
            self.balances.as_ref(),
        )
    }
}

/// ledger and balance outcome of one posted payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub application: PaymentApplication,
    pub balance: BalanceUpdate,
}

/// serializable snapshot of the facade's settings and pending events
#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerView {
    pub config: LedgerConfig,
    pub pending_events: Vec<LedgerEvent>,
}

/// monthly tuition ledger
pub struct TuitionLedger {
    config: LedgerConfig,
    stores: Collaborators,
    pub events: EventStore,
}

impl TuitionLedger {
    pub fn new(config: LedgerConfig, stores: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stores,
            events: EventStore::new(),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn stores(&self) -> &Collaborators {
        &self.stores
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        self.events.take_events()
    }

    /// build every active student's row for the month
    pub fn build_month(
        &mut self,
        year_month: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<MonthBuildReport> {
        let balances = self.stores.balance_service(&self.config);
        let builder = self.stores.builder(&self.config, &balances);
        builder.build_month(year_month, time, &mut self.events)
    }

    /// build the month containing the current time
    pub fn build_current_month(&mut self) -> Result<MonthBuildReport> {
        let time = SafeTimeProvider::new(TimeSource::System);
        self.build_month(YearMonth::from_datetime(time.now()), &time)
    }

    /// create a row for a newly enrolled student
    pub fn insert_student(
        &mut self,
        id: &StudentId,
        year_month: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<LedgerRow> {
        let balances = self.stores.balance_service(&self.config);
        let builder = self.stores.builder(&self.config, &balances);
        builder.insert_student(id, year_month, time, &mut self.events)
    }

    /// fold a posted payment into the month's row, then into the running
    /// balance. A ledger failure is returned as an error; a balance failure
    /// only leaves the balance stale.
    pub fn on_payment_posted(
        &mut self,
        id: &StudentId,
        year_month: YearMonth,
        entries: &[PaymentEntry],
        invoice_id: InvoiceId,
        time: &SafeTimeProvider,
    ) -> Result<PaymentOutcome> {
        let updater = IncrementalUpdater::new(&self.config, self.stores.ledger.as_ref());
        let application = updater
            .apply(id, year_month, entries, invoice_id, time, &mut self.events)
            .map_err(|e| {
                error!(student = %id, %year_month, invoice_id, error = %e, "payment not applied to ledger");
                e
            })?;

        let balance = self
            .stores
            .balance_service(&self.config)
            .apply_payment(id, entries, year_month, time, &mut self.events)?;
        if let BalanceUpdate::Stale { reason } = &balance {
            warn!(student = %id, invoice_id, %reason, "ledger updated but running balance is stale");
        }

        Ok(PaymentOutcome {
            application,
            balance,
        })
    }

    /// register a charge outside the monthly schedule
    pub fn register_debit(
        &mut self,
        id: &StudentId,
        amount: Money,
        fee_items: &[PaymentEntry],
        year_month: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<BalanceUpdate> {
        self.stores
            .balance_service(&self.config)
            .apply_debit(id, amount, fee_items, year_month, time, &mut self.events)
    }

    /// running balance, recomputed through `as_of` when not cached
    pub fn balance(
        &mut self,
        id: &StudentId,
        as_of: YearMonth,
        time: &SafeTimeProvider,
    ) -> Result<RunningBalance> {
        self.stores
            .balance_service(&self.config)
            .get(id, as_of, time, &mut self.events)
    }

    pub fn month_summary(&self, year_month: YearMonth, grade: Option<&str>) -> Result<MonthSummary> {
        MonthSummary::build(
            self.stores.ledger.as_ref(),
            self.stores.directory.as_ref(),
            year_month,
            grade,
        )
    }

    pub fn statement(&self, id: &StudentId, year_month: YearMonth) -> Result<StudentStatement> {
        StudentStatement::build(
            self.stores.ledger.as_ref(),
            self.stores.directory.as_ref(),
            id,
            year_month,
        )
    }

    pub fn outstanding_total(&self, year_month: YearMonth) -> Result<Money> {
        reports::outstanding_total(self.stores.ledger.as_ref(), year_month)
    }

    /// delete a calendar year's ledger rows; returns how many were removed
    pub fn year_end_rollover(&mut self, year: i32, time: &SafeTimeProvider) -> Result<usize> {
        let rows = self.stores.ledger.purge_year(year)?;
        info!(year, rows, "ledger year purged");
        self.events.emit(LedgerEvent::YearPurged {
            year,
            rows,
            timestamp: time.now(),
        });
        Ok(rows)
    }

    pub fn to_view(&self) -> LedgerView {
        LedgerView {
            config: self.config.clone(),
            pending_events: self.events.events().to_vec(),
        }
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Percent;
    use crate::errors::LedgerError;
    use crate::store::{MemoryStore, SqliteLedgerStore};
    use crate::types::{FeeCode, FeeDefinition, FeeGroup, MonthSet, PaymentEvent, Student};
    use chrono::{TimeZone, Utc};

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
    }

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn code(c: &str) -> FeeCode {
        FeeCode::new(c)
    }

    fn school() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.add_student(Student::new("100001", "An", "6").boarding(true));
        store.add_student(Student::new("100002", "Binh", "6").discount(Percent::from_whole(20).unwrap()));
        store.add_fee(FeeDefinition::new("HP06", "Tuition", Money::from_major(500_000), "6", MonthSet::all(), FeeGroup::PrimaryTuition));
        store.add_fee(FeeDefinition::new("NT06", "Boarding", Money::from_major(200_000), "6", MonthSet::all(), FeeGroup::Boarding));
        store.add_fee(FeeDefinition::new("BT06", "Books", Money::from_major(90_000), "6", MonthSet::parse("6"), FeeGroup::Other));
        Arc::new(store)
    }

    /// record the payment in the feed, then notify the ledger
    fn post(
        ledger: &mut TuitionLedger,
        feed: &MemoryStore,
        student: &str,
        period: &str,
        invoice_id: u64,
        entries: Vec<PaymentEntry>,
    ) -> Result<PaymentOutcome> {
        let id = StudentId::new(student);
        feed.add_payment(PaymentEvent {
            student: id.clone(),
            invoice_id,
            year_month: ym(period),
            entries: entries.clone(),
            posted_at: time().now(),
        });
        ledger.on_payment_posted(&id, ym(period), &entries, invoice_id, &time())
    }

    #[test]
    fn test_month_cycle_with_payments() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();
        let id = StudentId::new("100001");

        let report = ledger.build_month(ym("2025-01"), &time()).unwrap();
        assert_eq!(report.inserted, 2);

        let outcome = post(&mut ledger, &store, "100001", "2025-01", 1, vec![
            PaymentEntry::new("HP06", Money::from_major(500_000)),
        ])
        .unwrap();
        let row = &outcome.application.row;
        assert_eq!(row.paid.get(&code("HP06")), Money::from_major(500_000));
        assert_eq!(row.due.get(&code("HP06")), Money::ZERO);
        assert_eq!(row.closing.get(&code("HP06")), Money::ZERO);
        assert!(row.is_consistent(&ledger.config().exempt_codes));

        // the first balance write replays january, payment included
        let balance = outcome.balance.balance().unwrap();
        assert_eq!(balance.balance, Money::from_major(-200_000));

        ledger.build_month(ym("2025-02"), &time()).unwrap();
        let february = store.get(&id, ym("2025-02")).unwrap().unwrap();
        assert_eq!(february.opening.total, Money::from_major(-200_000));
        assert_eq!(february.closing.total, Money::from_major(-900_000));

        let summary = ledger.month_summary(ym("2025-01"), None).unwrap();
        assert_eq!(summary.total_closing, Money::from_major(-600_000));
        assert_eq!(summary.lines[0].latest_closing, Money::from_major(-900_000));
        assert_eq!(ledger.outstanding_total(ym("2025-02")).unwrap(), Money::from_major(-1_700_000));

        let events = ledger.take_events();
        assert!(events.iter().any(|e| matches!(e, LedgerEvent::PaymentApplied { invoice_id: 1, .. })));
        assert_eq!(events.iter().filter(|e| matches!(e, LedgerEvent::MonthBuilt { .. })).count(), 2);
    }

    #[test]
    fn test_exempt_payment_keeps_projections_aligned() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();
        ledger.build_month(ym("2025-01"), &time()).unwrap();

        // a twin of 100002 who joins in february, with the same january history
        store.add_student(Student::new("100005", "Binh's twin", "6").discount(Percent::from_whole(20).unwrap()));
        let uniform = vec![PaymentEntry::new("OT", Money::from_major(30_000))];
        post(&mut ledger, &store, "100002", "2025-01", 31, uniform.clone()).unwrap();
        store.add_payment(PaymentEvent {
            student: StudentId::new("100005"),
            invoice_id: 32,
            year_month: ym("2025-01"),
            entries: uniform,
            posted_at: time().now(),
        });

        let january = ledger.statement(&StudentId::new("100002"), ym("2025-01")).unwrap();
        assert_eq!(january.closing.total, Money::from_major(-400_000));
        assert_eq!(january.paid.total, Money::from_major(30_000));

        ledger.build_month(ym("2025-02"), &time()).unwrap();
        let carried = store.get(&StudentId::new("100002"), ym("2025-02")).unwrap().unwrap();
        let first = store.get(&StudentId::new("100005"), ym("2025-02")).unwrap().unwrap();
        let running = ledger.balance(&StudentId::new("100002"), ym("2025-01"), &time()).unwrap();

        assert_eq!(carried.opening.total, Money::from_major(-400_000));
        assert_eq!(first.opening.total, carried.opening.total);
        assert_eq!(running.balance, carried.opening.total);
    }

    #[test]
    fn test_rebuild_is_a_conflict() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store)).unwrap();
        ledger.build_month(ym("2025-01"), &time()).unwrap();

        let err = ledger.build_month(ym("2025-01"), &time()).unwrap_err();
        assert!(matches!(err, LedgerError::MonthAlreadyBuilt { existing: 2, .. }));
    }

    #[test]
    fn test_payment_without_row_fails_before_touching_balance() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();

        let err = post(&mut ledger, &store, "100001", "2025-03", 5, vec![PaymentEntry::new("HP06", Money::ONE)])
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_balance(&StudentId::new("100001")).unwrap().is_none());
    }

    #[test]
    fn test_balance_failure_does_not_fail_payment() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();
        ledger.build_month(ym("2025-01"), &time()).unwrap();
        store.fail_balance_writes(true);

        let outcome = post(&mut ledger, &store, "100002", "2025-01", 2, vec![
            PaymentEntry::new("HP06", Money::from_major(400_000)),
        ])
        .unwrap();
        assert!(outcome.balance.is_stale());
        assert_eq!(outcome.application.row.closing.total, Money::ZERO);

        store.fail_balance_writes(false);
        let healed = ledger.balance(&StudentId::new("100002"), ym("2025-01"), &time()).unwrap();
        assert_eq!(healed.balance, Money::ZERO);
        assert!(ledger.events.events().iter().any(|e| matches!(e, LedgerEvent::BalanceStale { .. })));
    }

    #[test]
    fn test_mid_cycle_enrollment_and_debit() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();
        ledger.build_month(ym("2025-01"), &time()).unwrap();

        store.add_student(Student::new("100003", "Chi", "6"));
        let row = ledger.insert_student(&StudentId::new("100003"), ym("2025-01"), &time()).unwrap();
        assert_eq!(row.assessed.total, Money::from_major(500_000));
        let again = ledger.insert_student(&StudentId::new("100003"), ym("2025-01"), &time()).unwrap();
        assert_eq!(again.id, row.id);

        let update = ledger
            .register_debit(&StudentId::new("100003"), Money::from_major(50_000), &[], ym("2025-01"), &time())
            .unwrap();
        let balance = update.balance().unwrap();
        assert_eq!(balance.balance, Money::from_major(-550_000));
        assert_eq!(balance.code_balance(&ledger.config().carry_code), Money::from_major(-50_000));
    }

    #[test]
    fn test_year_end_rollover() {
        let store = school();
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(store.clone())).unwrap();
        ledger.build_month(ym("2025-01"), &time()).unwrap();
        ledger.build_month(ym("2025-02"), &time()).unwrap();

        assert_eq!(ledger.year_end_rollover(2025, &time()).unwrap(), 4);
        assert_eq!(store.row_count(), 0);
        assert!(matches!(ledger.take_events().last(), Some(LedgerEvent::YearPurged { rows: 4, .. })));
    }

    #[test]
    fn test_sqlite_backed_ledger() {
        let school = school();
        let sqlite = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let stores = Collaborators {
            directory: school.clone(),
            catalog: school.clone(),
            payments: school.clone(),
            ledger: sqlite.clone(),
            balances: sqlite.clone(),
        };
        let mut ledger = TuitionLedger::new(LedgerConfig::default(), stores).unwrap();

        // june opens the school cycle, so nothing is carried in
        ledger.build_month(ym("2025-06"), &time()).unwrap();
        let outcome = post(&mut ledger, &school, "100001", "2025-06", 77, vec![
            PaymentEntry::new("HP06", Money::from_major(500_000)),
            PaymentEntry::new("BT06", Money::from_major(90_000)),
        ])
        .unwrap();

        let row = sqlite.get(&StudentId::new("100001"), ym("2025-06")).unwrap().unwrap();
        assert_eq!(row, outcome.application.row);
        assert_eq!(row.tuitions_joined(), "HP06,NT06,BT06");
        assert_eq!(row.due.total, Money::from_major(200_000));
        assert!(row.is_consistent(&ledger.config().exempt_codes));

        let statement = ledger.statement(&StudentId::new("100001"), ym("2025-06")).unwrap();
        assert_eq!(statement.closing.total, Money::from_major(-200_000));
        assert!(sqlite.get_balance(&StudentId::new("100001")).unwrap().is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LedgerConfig::default().with_batch_size(0);
        assert!(TuitionLedger::new(config, Collaborators::single(school())).is_err());
    }

    #[test]
    fn test_view_serializes() {
        let ledger = TuitionLedger::new(LedgerConfig::default(), Collaborators::single(school())).unwrap();
        let json = ledger.to_json_pretty().unwrap();
        assert!(json.contains("\"graduated_grade\": \"LT\""));
    }
}
