//! Report command - gains per tax year after the annual exclusion

use super::{format_zar, run_engine};
use clap::Args;
use fifotax::tax::{AllocationPolicy, EngineOptions, GainReport, Summary, TaxYear};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct ReportCommand {
    /// Transactions file (CSV or JSON). Reads JSON from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Tax year to report (e.g. 2024 or 2024/2025)
    #[arg(short, long)]
    year: Option<TaxYear>,

    /// Annual exclusion deducted from each year's net gain
    #[arg(long, default_value = "40000")]
    exclusion: Decimal,

    /// Share of the net gain that is taxable
    #[arg(long, default_value = "0.4")]
    inclusion_rate: Decimal,

    /// Output as JSON instead of formatted tables
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ReportOutput<'a> {
    policy: AllocationPolicy,
    summary: &'a Summary,
    #[serde(flatten)]
    gains: GainReport,
}

impl ReportCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let engine = run_engine(&self.file, EngineOptions::default())?;
        let policy = AllocationPolicy {
            annual_exclusion: self.exclusion,
            inclusion_rate: self.inclusion_rate,
        };

        let mut gains = engine.gain_report(&policy);
        if let Some(year) = self.year {
            gains.years.retain(|y, _| *y == year);
        }

        if self.json {
            let output = ReportOutput {
                policy,
                summary: engine.summary(),
                gains,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            self.print_summary(engine.summary());
            self.print_years(&gains, &policy);
        }
        Ok(())
    }

    fn print_summary(&self, summary: &Summary) {
        println!();
        println!("SUMMARY");
        println!(
            "  Transactions:  {} ({} buys, {} sells, {} trades)",
            summary.transactions_processed, summary.buys, summary.sells, summary.trades
        );
        println!("  Proceeds:      {}", format_zar(summary.total_proceeds));
        println!("  Cost base:     {}", format_zar(summary.total_cost_base));
        println!("  Gains:         {}", format_zar(summary.total_capital_gain));
        println!("  Losses:        {}", format_zar(summary.total_capital_loss));
        println!("  Net gain:      {}", format_zar(summary.net_capital_gain));
        println!();
    }

    fn print_years(&self, gains: &GainReport, policy: &AllocationPolicy) {
        if gains.years.is_empty() {
            let scope = self.year.map_or("any tax year".to_string(), |y| y.label());
            println!("No disposals in {}", scope);
            return;
        }

        for (year, year_gains) in &gains.years {
            println!("TAX YEAR {}", year);

            let rows: Vec<AssetRow> = year_gains
                .assets
                .iter()
                .map(|(asset, a)| AssetRow {
                    asset: asset.clone(),
                    disposals: a.disposals,
                    proceeds: format_zar(a.proceeds),
                    cost_base: format_zar(a.cost_base),
                    gain: format_zar(a.gross_gain),
                })
                .collect();
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);

            println!("  Gross gain:          {}", format_zar(year_gains.gross_gain));
            println!(
                "  Annual exclusion:    {} (of {})",
                format_zar(year_gains.exclusion_applied),
                format_zar(policy.annual_exclusion)
            );
            println!(
                "  After exclusion:     {}",
                format_zar(year_gains.net_after_exclusion)
            );
            println!(
                "  Taxable ({}%):       {}",
                (policy.inclusion_rate * Decimal::ONE_HUNDRED).normalize(),
                format_zar(year_gains.taxable_gain)
            );
            println!();
        }
    }
}

#[derive(Debug, Tabled)]
struct AssetRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Disposals")]
    disposals: usize,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Cost Base")]
    cost_base: String,
    #[tabled(rename = "Gain")]
    gain: String,
}
