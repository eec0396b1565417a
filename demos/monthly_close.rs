/// monthly close - build a month, post payments, carry balances forward
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing_subscriber::EnvFilter;
use tuition_ledger_rs::catalog::FeeCatalogResolver;
use tuition_ledger_rs::{
    AdvancePaymentDistributor, Collaborators, FeeDefinition, FeeGroup, LedgerConfig, MemoryStore,
    Money, MonthSet, PaymentEntry, PaymentEvent, Percent, SafeTimeProvider, Student, StudentId,
    TimeSource, TuitionLedger, YearMonth,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== monthly close example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap()));

    // seed a small school
    let school = Arc::new(MemoryStore::new());
    school.add_student(Student::new("100001", "Nguyen An", "6").boarding(true));
    school.add_student(Student::new("100002", "Tran Binh", "6").discount(Percent::from_whole(50)?));
    school.add_student(Student::new("100003", "Le Chi", "LT"));
    school.add_fee(FeeDefinition::new("HP06", "Tuition", Money::from_major(1_500_000), "6", MonthSet::all(), FeeGroup::PrimaryTuition));
    school.add_fee(FeeDefinition::new("NT06", "Boarding", Money::from_major(900_000), "6", MonthSet::all(), FeeGroup::Boarding));
    school.add_fee(FeeDefinition::new("BT06", "Books", Money::from_major(300_000), "6", MonthSet::parse("6,9"), FeeGroup::Other));

    let config = LedgerConfig::default();
    let scale = config.display_scale;
    let mut ledger = TuitionLedger::new(config, Collaborators::single(school.clone()))?;

    // june opens the cycle
    let june: YearMonth = "2025-06".parse()?;
    let report = ledger.build_month(june, &time)?;
    println!("built {}: {} rows, {} graduated skipped", june, report.inserted, report.excluded);

    // an's family pays three months ahead
    let an = StudentId::new("100001");
    let entries = vec![
        PaymentEntry::new("HP06", Money::from_major(4_500_000)),
        PaymentEntry::new("NT06", Money::from_major(2_700_000)),
        PaymentEntry::new("BT06", Money::from_major(300_000)),
    ];
    school.add_payment(PaymentEvent {
        student: an.clone(),
        invoice_id: 1001,
        year_month: june,
        entries: entries.clone(),
        posted_at: time.now(),
    });
    let outcome = ledger.on_payment_posted(&an, june, &entries, 1001, &time)?;
    println!("\ninvoice 1001 applied, june closing: {}", outcome.application.row.closing.total.to_display(scale));

    let balance = ledger.balance(&an, june, &time)?;
    println!("running balance: {} ({} ahead)", balance.balance.to_display(scale), balance.advance.describe(scale));

    // how the credit spreads over a month of fees
    let schedule = FeeCatalogResolver::new(school.as_ref()).resolve_for(
        &Student::new("100001", "Nguyen An", "6").boarding(true),
        "2025-07".parse()?,
    )?;
    let distribution = AdvancePaymentDistributor::new().distribute(balance.balance, &schedule);
    for (code, amount) in &distribution.by_code {
        println!("  {}: {}", code, amount.to_display(scale));
    }

    // july carries june forward
    let july: YearMonth = "2025-07".parse()?;
    ledger.build_month(july, &time)?;

    let summary = ledger.month_summary(july, None)?;
    println!("\n{} listing:", july);
    for line in &summary.lines {
        println!(
            "  {} {:<12} opening {:>12} closing {:>12}",
            line.student,
            line.student_name,
            line.opening.to_display(scale),
            line.closing.to_display(scale)
        );
    }
    println!("outstanding: {}", ledger.outstanding_total(july)?.to_display(scale));

    println!("\nstatement:");
    println!("{}", ledger.statement(&an, july)?.to_json_pretty()?);

    println!("\nevents recorded: {}", ledger.take_events().len());

    Ok(())
}
