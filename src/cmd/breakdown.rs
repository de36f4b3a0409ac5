//! Breakdown command - one row per transaction plus the lots it consumed

use super::{format_quantity, format_zar, run_engine};
use clap::Args;
use fifotax::tax::{Breakdown, BreakdownDetail, EngineOptions, TaxYear};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct BreakdownCommand {
    /// Transactions file (CSV or JSON). Reads JSON from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Only transactions in this tax year (e.g. 2024 or 2024/2025)
    #[arg(short, long)]
    year: Option<TaxYear>,

    /// Only transactions touching this asset
    #[arg(short, long)]
    asset: Option<String>,

    /// Write CSV to stdout instead of a table
    #[arg(long)]
    csv: bool,
}

impl BreakdownCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let engine = run_engine(&self.file, EngineOptions::default())?;
        let breakdowns: Vec<&Breakdown> = engine
            .breakdowns()
            .iter()
            .filter(|b| self.year.is_none_or(|y| b.tax_year == y))
            .filter(|b| {
                self.asset
                    .as_deref()
                    .is_none_or(|a| touches_asset(b, a))
            })
            .collect();

        if self.csv {
            self.write_csv(&breakdowns)
        } else {
            self.print_table(&breakdowns);
            Ok(())
        }
    }

    fn write_csv(&self, breakdowns: &[&Breakdown]) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(io::stdout());
        for breakdown in breakdowns {
            wtr.serialize(CsvRow::from(*breakdown))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn print_table(&self, breakdowns: &[&Breakdown]) {
        if breakdowns.is_empty() {
            println!("No transactions found matching filters");
            return;
        }

        let mut rows = Vec::new();
        let mut warnings = Vec::new();
        for breakdown in breakdowns {
            rows.push(TableRow::from(*breakdown));
            if let Some(disposal) = breakdown.disposal() {
                for lot in &disposal.lots_consumed {
                    rows.push(TableRow {
                        line: String::new(),
                        date: String::new(),
                        tax_year: String::new(),
                        kind: "  lot".to_string(),
                        asset: format!("line {}", lot.source_line),
                        quantity: format_quantity(lot.quantity),
                        proceeds: format!("@ {}", format_zar(lot.unit_cost)),
                        cost_base: format_zar(lot.cost_base),
                        gain: lot.acquired.format("%Y-%m-%d").to_string(),
                    });
                }
                for warning in &disposal.warnings {
                    warnings.push(format!("line {}: {}", breakdown.line, warning));
                }
            }
        }

        println!();
        println!("TRANSACTION BREAKDOWN");
        println!();
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(5..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);

        if !warnings.is_empty() {
            println!();
            println!("WARNINGS");
            for warning in warnings {
                println!("  {}", warning);
            }
        }
    }
}

fn touches_asset(breakdown: &Breakdown, asset: &str) -> bool {
    match &breakdown.detail {
        BreakdownDetail::Buy { asset: a, .. } | BreakdownDetail::Sell { asset: a, .. } => {
            a.eq_ignore_ascii_case(asset)
        }
        BreakdownDetail::Trade {
            disposed_asset,
            acquired_asset,
            ..
        } => disposed_asset.eq_ignore_ascii_case(asset) || acquired_asset.eq_ignore_ascii_case(asset),
    }
}

/// "0.5 BTC" or "1 BTC -> 10 ETH"
fn describe(breakdown: &Breakdown) -> (String, String) {
    match &breakdown.detail {
        BreakdownDetail::Buy {
            asset, quantity, ..
        }
        | BreakdownDetail::Sell {
            asset, quantity, ..
        } => (asset.clone(), format_quantity(*quantity)),
        BreakdownDetail::Trade {
            disposed_asset,
            disposed_quantity,
            acquired_asset,
            acquired_quantity,
            ..
        } => (
            format!("{} -> {}", disposed_asset, acquired_asset),
            format!(
                "{} -> {}",
                format_quantity(*disposed_quantity),
                format_quantity(*acquired_quantity)
            ),
        ),
    }
}

#[derive(Debug, Tabled)]
struct TableRow {
    #[tabled(rename = "Line")]
    line: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Tax Year")]
    tax_year: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Cost Base")]
    cost_base: String,
    #[tabled(rename = "Gain")]
    gain: String,
}

impl From<&Breakdown> for TableRow {
    fn from(breakdown: &Breakdown) -> Self {
        let (asset, quantity) = describe(breakdown);
        let (proceeds, cost_base, gain) = match (&breakdown.detail, breakdown.disposal()) {
            (BreakdownDetail::Buy { total_cost, .. }, _) => {
                (String::new(), format_zar(*total_cost), String::new())
            }
            (_, Some(d)) => (
                format_zar(d.proceeds),
                format_zar(d.cost_base),
                format_zar(d.capital_gain),
            ),
            (_, None) => Default::default(),
        };
        TableRow {
            line: breakdown.line.to_string(),
            date: breakdown.datetime.format("%Y-%m-%d %H:%M").to_string(),
            tax_year: breakdown.tax_year.label(),
            kind: breakdown.kind_name().to_string(),
            asset,
            quantity,
            proceeds,
            cost_base,
            gain,
        }
    }
}

#[derive(Debug, Serialize)]
struct CsvRow {
    line: u64,
    datetime: String,
    tax_year: String,
    kind: &'static str,
    wallet: String,
    asset: String,
    quantity: String,
    fee: String,
    total_cost: String,
    proceeds: String,
    cost_base: String,
    capital_gain: String,
    lots_consumed: usize,
    warnings: String,
}

impl From<&Breakdown> for CsvRow {
    fn from(breakdown: &Breakdown) -> Self {
        let (asset, quantity) = describe(breakdown);
        let total_cost = match &breakdown.detail {
            BreakdownDetail::Buy { total_cost, .. } => total_cost.to_string(),
            _ => String::new(),
        };
        let disposal = breakdown.disposal();
        CsvRow {
            line: breakdown.line,
            datetime: breakdown.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            tax_year: breakdown.tax_year.label(),
            kind: breakdown.kind_name(),
            wallet: breakdown.wallet.clone().unwrap_or_default(),
            asset,
            quantity,
            fee: breakdown.fee.to_string(),
            total_cost,
            proceeds: disposal.map_or(String::new(), |d| d.proceeds.to_string()),
            cost_base: disposal.map_or(String::new(), |d| d.cost_base.to_string()),
            capital_gain: disposal.map_or(String::new(), |d| d.capital_gain.to_string()),
            lots_consumed: disposal.map_or(0, |d| d.lots_consumed.len()),
            warnings: disposal.map_or(String::new(), |d| {
                d.warnings
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            }),
        }
    }
}
