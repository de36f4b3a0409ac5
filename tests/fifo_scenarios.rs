use chrono::{NaiveDate, NaiveDateTime};
use fifotax::core::{read_transactions_json, sort_transactions, Amount, Transaction};
use fifotax::tax::{AllocationPolicy, EngineOptions, FifoEngine, FifoError, TaxYear, EPSILON};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn dt(date: &str) -> NaiveDateTime {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn buy(line: u64, date: &str, asset: &str, qty: Decimal, price: Decimal) -> Transaction {
    Transaction::buy(line, dt(date), Amount::new(asset, qty), price)
}

fn sell(line: u64, date: &str, asset: &str, qty: Decimal, price: Decimal) -> Transaction {
    Transaction::sell(line, dt(date), Amount::new(asset, qty), price)
}

fn process(transactions: &[Transaction]) -> FifoEngine {
    let mut engine = FifoEngine::default();
    engine.process_transactions(transactions).unwrap();
    engine
}

fn assert_close(actual: Decimal, expected: Decimal) {
    assert!(
        (actual - expected).abs() <= EPSILON,
        "expected {} to be within {} of {}",
        actual,
        EPSILON,
        expected
    );
}

#[test]
fn conservation_of_cost_across_partial_sells() {
    let engine = process(&[
        buy(1, "2024-01-01", "BTC", dec!(1), dec!(33333.33)).with_fee(dec!(17.17)),
        sell(2, "2024-02-01", "BTC", dec!(0.3), dec!(40000)),
        sell(3, "2024-03-01", "BTC", dec!(0.3333), dec!(41000)),
        sell(4, "2024-04-01", "BTC", dec!(0.3667), dec!(42000)),
    ]);

    let consumed: Decimal = engine
        .breakdowns()
        .iter()
        .filter_map(|b| b.disposal())
        .map(|d| d.cost_base)
        .sum();
    assert_close(consumed, dec!(33350.50));
    assert!(engine.ledger("BTC", None).unwrap().is_empty());
    assert_close(engine.summary().total_cost_base, dec!(33350.50));
}

#[test]
fn conservation_when_sells_leave_dust() {
    let engine = process(&[
        buy(1, "2024-01-01", "BTC", dec!(1), dec!(20000)),
        sell(2, "2024-02-01", "BTC", dec!(0.999999995), dec!(30000)),
        sell(3, "2024-02-02", "BTC", dec!(0.000000005), dec!(30000)),
    ]);

    let consumed: Decimal = engine
        .breakdowns()
        .iter()
        .filter_map(|b| b.disposal())
        .map(|d| d.cost_base)
        .sum();
    assert_eq!(consumed, dec!(20000));

    // The first sell took the whole lot, dust included
    let first = engine.breakdowns()[1].disposal().unwrap();
    assert_eq!(first.lots_consumed[0].quantity, dec!(1));
    assert!(engine.ledger("BTC", None).unwrap().is_empty());

    // Nothing left to take, and the gap is within tolerance
    let last = engine.breakdowns()[2].disposal().unwrap();
    assert!(last.lots_consumed.is_empty());
    assert!(last.warnings.is_empty());
}

#[test]
fn tiny_sell_takes_cost_from_lot() {
    let engine = process(&[
        buy(1, "2024-01-01", "BTC", dec!(1), dec!(20000)),
        sell(2, "2024-02-01", "BTC", dec!(0.000000005), dec!(30000)),
        sell(3, "2024-02-02", "BTC", dec!(0.999999995), dec!(30000)),
    ]);

    let costs: Vec<_> = engine
        .breakdowns()
        .iter()
        .filter_map(|b| b.disposal())
        .map(|d| d.cost_base)
        .collect();
    assert_eq!(costs, vec![dec!(0.0001), dec!(19999.9999)]);
    assert_close(costs.iter().sum(), dec!(20000));
}

#[test]
fn fifo_disposal_within_first_lot() {
    let engine = process(&[
        buy(1, "2024-01-01", "ETH", dec!(2), dec!(1000)),
        buy(2, "2024-01-02", "ETH", dec!(2), dec!(2000)),
        buy(3, "2024-01-03", "ETH", dec!(2), dec!(3000)),
        sell(4, "2024-01-04", "ETH", dec!(1.5), dec!(2500)),
    ]);

    let disposal = engine.breakdowns()[3].disposal().unwrap();
    assert_eq!(disposal.lots_consumed.len(), 1);
    assert_eq!(disposal.lots_consumed[0].source_line, 1);
    assert_eq!(disposal.lots_consumed[0].unit_cost, dec!(1000));
}

#[test]
fn fifo_disposal_spanning_two_lots_keeps_order() {
    let engine = process(&[
        buy(1, "2024-01-01", "ETH", dec!(2), dec!(1000)),
        buy(2, "2024-01-02", "ETH", dec!(2), dec!(2000)),
        buy(3, "2024-01-03", "ETH", dec!(2), dec!(3000)),
        sell(4, "2024-01-04", "ETH", dec!(3), dec!(2500)),
    ]);

    let disposal = engine.breakdowns()[3].disposal().unwrap();
    let trail: Vec<_> = disposal
        .lots_consumed
        .iter()
        .map(|r| (r.source_line, r.quantity))
        .collect();
    assert_eq!(trail, vec![(1, dec!(2)), (2, dec!(1))]);
    assert_eq!(disposal.cost_base, dec!(4000));
}

#[test]
fn trade_matches_equivalent_sell_for_outbound_asset() {
    let opening = buy(1, "2024-03-05", "BTC", dec!(2), dec!(20000)).with_fee(dec!(40));

    // 1.5 BTC for 20 ETH at 2 400 per ETH, so 48 000 of proceeds
    let traded = process(&[
        opening.clone(),
        Transaction::trade(
            2,
            dt("2024-04-01"),
            Amount::new("BTC", dec!(1.5)),
            Amount::new("ETH", dec!(20)),
            dec!(2400),
        ),
    ]);
    let sold = process(&[
        opening,
        sell(2, "2024-04-01", "BTC", dec!(1.5), dec!(32000)),
    ]);

    let trade_disposal = traded.breakdowns()[1].disposal().unwrap();
    let sell_disposal = sold.breakdowns()[1].disposal().unwrap();
    assert_eq!(trade_disposal.proceeds, sell_disposal.proceeds);
    assert_eq!(trade_disposal.cost_base, sell_disposal.cost_base);
    assert_eq!(trade_disposal.capital_gain, sell_disposal.capital_gain);
    assert_eq!(trade_disposal.lots_consumed, sell_disposal.lots_consumed);

    let btc_after_trade = traded.ledger("BTC", None).unwrap().snapshot();
    let btc_after_sell = sold.ledger("BTC", None).unwrap().snapshot();
    assert_eq!(btc_after_trade, btc_after_sell);
    assert_eq!(traded.breakdowns()[1].tax_year, TaxYear(2024));
}

#[test]
fn allocation_report_reaggregates_to_running_summary() {
    let engine = process(&[
        buy(1, "2022-05-01", "BTC", dec!(1), dec!(500000)),
        buy(2, "2022-06-01", "ETH", dec!(10), dec!(30000)),
        sell(3, "2023-01-10", "BTC", dec!(0.25), dec!(300000)),
        Transaction::trade(
            4,
            dt("2023-07-01"),
            Amount::new("ETH", dec!(4)),
            Amount::new("SOL", dec!(100)),
            dec!(1500),
        ),
        sell(5, "2024-02-29", "SOL", dec!(60), dec!(2000)),
        sell(6, "2024-03-01", "BTC", dec!(0.5), dec!(1100000)).with_fee(dec!(500)),
    ]);

    let report = engine.gain_report(&AllocationPolicy::default());
    let summary = engine.summary();
    assert_eq!(report.total_gross_gain(), summary.net_capital_gain);

    let proceeds: Decimal = report
        .years
        .values()
        .flat_map(|y| y.assets.values())
        .map(|a| a.proceeds)
        .sum();
    assert_eq!(proceeds, summary.total_proceeds);

    let years: Vec<_> = report.years.keys().copied().collect();
    assert_eq!(years, vec![TaxYear(2022), TaxYear(2023), TaxYear(2024)]);

    let allocated = engine.allocate_disposals();
    assert_eq!(
        allocated[&TaxYear(2023)].keys().collect::<Vec<_>>(),
        vec!["ETH", "SOL"]
    );
}

#[test]
fn taxable_gain_is_monotonic_and_zero_up_to_exclusion() {
    let policy = AllocationPolicy::default();
    let mut previous = None;
    for gross in [
        dec!(-10000),
        dec!(0),
        dec!(20000),
        dec!(40000),
        dec!(40000.01),
        dec!(55000),
        dec!(120000),
    ] {
        let engine = process(&[
            buy(1, "2024-04-01", "BTC", dec!(1), dec!(100000)),
            sell(2, "2024-05-01", "BTC", dec!(1), dec!(100000) + gross),
        ]);
        let report = engine.gain_report(&policy);
        let year = &report.years[&TaxYear(2024)];
        assert_eq!(year.gross_gain, gross);

        if gross >= Decimal::ZERO && gross <= policy.annual_exclusion {
            assert_eq!(year.taxable_gain, Decimal::ZERO);
        }
        if let Some(prev) = previous {
            assert!(year.taxable_gain >= prev, "{} < {}", year.taxable_gain, prev);
        }
        previous = Some(year.taxable_gain);
    }
}

#[test]
fn scenario_sell_half_of_one_lot() {
    let engine = process(&[
        buy(1, "2024-01-01", "BTC", dec!(1), dec!(20000)),
        sell(2, "2024-01-02", "BTC", dec!(0.5), dec!(50000)),
    ]);
    let disposal = engine.breakdowns()[1].disposal().unwrap();
    assert_eq!(disposal.proceeds, dec!(25000));
    assert_eq!(disposal.cost_base, dec!(10000));
    assert_eq!(disposal.capital_gain, dec!(15000));
    assert_eq!(disposal.lots_consumed.len(), 1);
    assert_eq!(disposal.lots_consumed[0].quantity, dec!(0.5));
    assert_eq!(disposal.lots_consumed[0].unit_cost, dec!(20000));
}

#[test]
fn scenario_sell_across_two_lots() {
    let engine = process(&[
        buy(1, "2024-01-01", "BTC", dec!(0.5), dec!(20000)),
        buy(2, "2024-01-02", "BTC", dec!(0.5), dec!(30000)),
        sell(3, "2024-01-03", "BTC", dec!(0.7), dec!(50000)),
    ]);
    let disposal = engine.breakdowns()[2].disposal().unwrap();
    assert_eq!(disposal.cost_base, dec!(16000));
    assert_eq!(disposal.lots_consumed.len(), 2);

    let ledger = engine.ledger("BTC", None).unwrap();
    assert_eq!(ledger.total_quantity(), dec!(0.3));
    assert_eq!(ledger.average_unit_cost(), dec!(30000));
}

#[test]
fn scenario_exclusion_and_inclusion() {
    let engine = process(&[
        buy(1, "2024-03-01", "BTC", dec!(1), dec!(100000)),
        sell(2, "2024-09-01", "BTC", dec!(1), dec!(180000)),
    ]);
    let report = engine.gain_report(&AllocationPolicy::default());
    let year = &report.years[&TaxYear(2024)];
    assert_eq!(year.gross_gain, dec!(80000));
    assert_eq!(year.net_after_exclusion, dec!(40000));
    assert_eq!(year.taxable_gain, dec!(16000));
}

#[test]
fn year_end_snapshots_follow_the_stream() {
    let engine = process(&[
        buy(1, "2023-06-01", "BTC", dec!(1), dec!(20000)),
        sell(2, "2024-01-15", "BTC", dec!(0.3), dec!(50000)),
        buy(3, "2024-06-01", "BTC", dec!(1), dec!(30000)),
        sell(4, "2024-12-01", "BTC", dec!(0.5), dec!(70000)),
    ]);
    let snapshots = engine.tax_year_snapshots();
    assert_eq!(snapshots[&TaxYear(2023)][0].quantity, dec!(0.7));
    assert_eq!(snapshots[&TaxYear(2024)][0].quantity, dec!(1.2));
}

#[test]
fn per_year_gains_with_and_without_exclusion() {
    let engine = process(&[
        buy(1, "2023-06-01", "BTC", dec!(1), dec!(20000)),
        sell(2, "2024-01-15", "BTC", dec!(0.3), dec!(50000)),
        buy(3, "2024-03-01", "ETH", dec!(10), dec!(2000)),
        sell(4, "2024-06-01", "BTC", dec!(0.5), dec!(40000)),
        sell(5, "2024-12-01", "ETH", dec!(5), dec!(3000)),
    ]);

    let flat = engine.gain_report(&AllocationPolicy {
        annual_exclusion: Decimal::ZERO,
        inclusion_rate: dec!(1),
    });
    assert_eq!(flat.years[&TaxYear(2023)].taxable_gain, dec!(9000));
    assert_eq!(flat.years[&TaxYear(2024)].assets["BTC"].gross_gain, dec!(10000));
    assert_eq!(flat.years[&TaxYear(2024)].assets["ETH"].gross_gain, dec!(5000));
    assert_eq!(flat.years[&TaxYear(2024)].taxable_gain, dec!(15000));

    let statutory = engine.gain_report(&AllocationPolicy::default());
    assert_eq!(statutory.years[&TaxYear(2024)].exclusion_applied, dec!(15000));
    assert_eq!(statutory.total_taxable_gain(), Decimal::ZERO);
}

#[test]
fn unsorted_input_is_rejected_until_sorted() {
    let data = r#"{"transactions": [
        {"line": 2, "date": "2024-05-01", "kind": "SELL", "from_asset": "BTC", "from_amount": "0.5", "price": "60000"},
        {"line": 1, "date": "2024-04-01", "kind": "BUY", "to_asset": "BTC", "to_amount": "1", "price": "50000"}
    ]}"#;
    let mut transactions = read_transactions_json(data.as_bytes()).unwrap();

    let err = FifoEngine::default()
        .process_transactions(&transactions)
        .unwrap_err();
    assert!(matches!(err, FifoError::NoBalance { line: 2, .. }));

    sort_transactions(&mut transactions);
    let engine = process(&transactions);
    assert_eq!(engine.summary().net_capital_gain, dec!(5000));
}

#[test]
fn independent_engines_do_not_share_ledgers() {
    let mut first = FifoEngine::new(EngineOptions::default());
    let mut second = FifoEngine::new(EngineOptions::default());
    first
        .process_transaction(&buy(1, "2024-01-01", "BTC", dec!(1), dec!(100)))
        .unwrap();

    assert!(second
        .process_transaction(&sell(1, "2024-01-02", "BTC", dec!(1), dec!(100)))
        .is_err());
    assert!(second.ledgers().next().is_none());
    assert_eq!(first.ledgers().count(), 1);
}
