//! Groups disposals by tax year and asset, then applies the annual exclusion
//! and inclusion rate to each year's net gain.

use super::fifo::Breakdown;
use super::year::TaxYear;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;

/// Annual exclusion and inclusion rate applied to each tax year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationPolicy {
    pub annual_exclusion: Decimal,
    pub inclusion_rate: Decimal,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        AllocationPolicy {
            annual_exclusion: dec!(40000),
            inclusion_rate: dec!(0.4),
        }
    }
}

/// Disposal totals for one asset within a tax year
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetGains {
    pub disposals: usize,
    pub proceeds: Decimal,
    pub cost_base: Decimal,
    pub gross_gain: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaxYearGains {
    pub assets: BTreeMap<String, AssetGains>,
    /// Net of gains and losses across all assets
    pub gross_gain: Decimal,
    pub exclusion_applied: Decimal,
    pub net_after_exclusion: Decimal,
    pub taxable_gain: Decimal,
}

impl TaxYearGains {
    /// The exclusion only reduces a positive net gain, and never below zero.
    /// A net loss passes through unchanged.
    fn apply_policy(&mut self, policy: &AllocationPolicy) {
        if self.gross_gain > Decimal::ZERO {
            self.exclusion_applied = policy.annual_exclusion.min(self.gross_gain);
            self.net_after_exclusion =
                (self.gross_gain - policy.annual_exclusion).max(Decimal::ZERO);
        } else {
            self.exclusion_applied = Decimal::ZERO;
            self.net_after_exclusion = self.gross_gain;
        }
        self.taxable_gain = self.net_after_exclusion * policy.inclusion_rate;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GainReport {
    pub years: BTreeMap<TaxYear, TaxYearGains>,
}

impl GainReport {
    pub fn total_gross_gain(&self) -> Decimal {
        self.years.values().map(|y| y.gross_gain).sum()
    }

    pub fn total_taxable_gain(&self) -> Decimal {
        self.years.values().map(|y| y.taxable_gain).sum()
    }

    pub fn year(&self, year: TaxYear) -> Option<&TaxYearGains> {
        self.years.get(&year)
    }
}

/// Disposal breakdowns by tax year, then by disposed asset. Buys are skipped;
/// within a group breakdowns keep processing order.
pub fn allocate_disposals(
    breakdowns: &[Breakdown],
) -> BTreeMap<TaxYear, BTreeMap<String, Vec<&Breakdown>>> {
    let mut allocated: BTreeMap<TaxYear, BTreeMap<String, Vec<&Breakdown>>> = BTreeMap::new();
    for breakdown in breakdowns {
        if let Some(asset) = breakdown.disposed_asset() {
            allocated
                .entry(breakdown.tax_year)
                .or_default()
                .entry(asset.to_string())
                .or_default()
                .push(breakdown);
        }
    }
    allocated
}

pub fn calculate_gains(breakdowns: &[Breakdown], policy: &AllocationPolicy) -> GainReport {
    let mut report = GainReport::default();

    for (year, assets) in allocate_disposals(breakdowns) {
        let mut gains = TaxYearGains::default();
        for (asset, disposals) in assets {
            let mut asset_gains = AssetGains::default();
            for disposal in disposals.iter().filter_map(|b| b.disposal()) {
                asset_gains.disposals += 1;
                asset_gains.proceeds += disposal.proceeds;
                asset_gains.cost_base += disposal.cost_base;
                asset_gains.gross_gain += disposal.capital_gain;
            }
            gains.gross_gain += asset_gains.gross_gain;
            gains.assets.insert(asset, asset_gains);
        }
        gains.apply_policy(policy);

        log::debug!(
            "{}: gross gain {}, exclusion {}, taxable {}",
            year,
            gains.gross_gain,
            gains.exclusion_applied,
            gains.taxable_gain
        );
        report.years.insert(year, gains);
    }

    report
}
