//! Ledgers command - balances at each tax year end

use super::{format_quantity, format_zar, run_engine};
use clap::Args;
use fifotax::tax::{EngineOptions, LedgerSnapshot, TaxYear};
use serde::Serialize;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct LedgersCommand {
    /// Transactions file (CSV or JSON). Reads JSON from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Only this tax year (e.g. 2024 or 2024/2025)
    #[arg(short, long)]
    year: Option<TaxYear>,

    /// Only ledgers for this asset
    #[arg(short, long)]
    asset: Option<String>,

    /// Skip tax year snapshots and show closing balances only
    #[arg(long)]
    no_snapshots: bool,

    /// Output as JSON instead of formatted tables
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct LedgerView {
    /// None for closing balances
    tax_year: Option<TaxYear>,
    ledgers: Vec<LedgerSnapshot>,
}

impl LedgersCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let options = EngineOptions {
            snapshot_tax_years: !self.no_snapshots,
        };
        let engine = run_engine(&self.file, options)?;

        let views: Vec<LedgerView> = if self.no_snapshots {
            vec![LedgerView {
                tax_year: None,
                ledgers: self.filter(&engine.balances()),
            }]
        } else {
            engine
                .tax_year_snapshots()
                .iter()
                .filter(|(year, _)| self.year.is_none_or(|y| **year == y))
                .map(|(year, ledgers)| LedgerView {
                    tax_year: Some(*year),
                    ledgers: self.filter(ledgers),
                })
                .filter(|view| !view.ledgers.is_empty())
                .collect()
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            self.print_tables(&views);
        }
        Ok(())
    }

    fn filter(&self, ledgers: &[LedgerSnapshot]) -> Vec<LedgerSnapshot> {
        ledgers
            .iter()
            .filter(|l| {
                self.asset
                    .as_deref()
                    .is_none_or(|a| l.asset.eq_ignore_ascii_case(a))
            })
            .cloned()
            .collect()
    }

    fn print_tables(&self, views: &[LedgerView]) {
        if views.iter().all(|v| v.ledgers.is_empty()) {
            println!("No ledger balances found matching filters");
            return;
        }

        println!();
        println!("LEDGER BALANCES");
        println!();

        for view in views {
            match view.tax_year {
                Some(year) => println!("End of tax year {}", year),
                None => println!("Closing balances"),
            }

            let rows: Vec<LedgerRow> = view
                .ledgers
                .iter()
                .map(|l| LedgerRow {
                    asset: l.asset.clone(),
                    wallet: l.wallet.clone().unwrap_or_else(|| "-".to_string()),
                    quantity: format_quantity(l.quantity),
                    lots: l.lot_count,
                    cost_base: format_zar(l.cost_base),
                    average_cost: format_zar(l.average_unit_cost),
                })
                .collect();

            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
            println!();
        }
    }
}

#[derive(Debug, Tabled)]
struct LedgerRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Wallet")]
    wallet: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Lots")]
    lots: usize,
    #[tabled(rename = "Cost Base")]
    cost_base: String,
    #[tabled(rename = "Avg Cost")]
    average_cost: String,
}
