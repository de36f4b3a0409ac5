//! FIFO engine: walks a chronologically ordered transaction stream, keeps one
//! lot queue per (asset, wallet), and records a breakdown for every
//! transaction.

use super::allocation::{self, AllocationPolicy, GainReport};
use super::ledger::{
    AcquisitionLot, AssetLedger, ConsumptionRecord, LedgerError, LedgerKey, LedgerSnapshot,
    EPSILON,
};
use super::year::TaxYear;
use crate::core::{Amount, Transaction, TransactionKind, Warning};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FifoError {
    #[error("line {line}: cannot dispose of {key}: no balance found")]
    NoBalance { line: u64, key: LedgerKey },
    #[error("line {line}: {datetime} is earlier than the previous transaction at {previous}")]
    OutOfOrder {
        line: u64,
        datetime: NaiveDateTime,
        previous: NaiveDateTime,
    },
    /// Disposed quantities must be positive, acquired ones above `EPSILON`
    #[error("line {line}: invalid {asset} quantity {quantity}")]
    InvalidQuantity {
        line: u64,
        asset: String,
        quantity: Decimal,
    },
    #[error("line {line}: amounts are too large to value")]
    Overflow { line: u64 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Copy every ledger when the stream crosses into a new tax year
    pub snapshot_tax_years: bool,
}

/// What a transaction will book, worked out with checked arithmetic before
/// any ledger is touched
#[derive(Debug, Clone, Copy, Default)]
struct Valuation {
    proceeds: Decimal,
    total_cost: Decimal,
    unit_cost: Decimal,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            snapshot_tax_years: true,
        }
    }
}

/// Outcome of disposing of an asset (a SELL, or the sell leg of a TRADE)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disposal {
    pub proceeds: Decimal,
    pub cost_base: Decimal,
    pub capital_gain: Decimal,
    /// Lots drawn on, oldest first
    pub lots_consumed: Vec<ConsumptionRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum BreakdownDetail {
    Buy {
        asset: String,
        quantity: Decimal,
        total_cost: Decimal,
        unit_cost: Decimal,
    },
    Sell {
        asset: String,
        quantity: Decimal,
        disposal: Disposal,
    },
    Trade {
        disposed_asset: String,
        disposed_quantity: Decimal,
        acquired_asset: String,
        acquired_quantity: Decimal,
        /// Unit cost of the lot created by the buy leg
        acquired_unit_cost: Decimal,
        disposal: Disposal,
    },
}

/// Per-transaction audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub line: u64,
    pub datetime: NaiveDateTime,
    pub tax_year: TaxYear,
    pub wallet: Option<String>,
    pub fee: Decimal,
    #[serde(flatten)]
    pub detail: BreakdownDetail,
}

impl Breakdown {
    pub fn kind_name(&self) -> &'static str {
        match self.detail {
            BreakdownDetail::Buy { .. } => "BUY",
            BreakdownDetail::Sell { .. } => "SELL",
            BreakdownDetail::Trade { .. } => "TRADE",
        }
    }

    pub fn disposal(&self) -> Option<&Disposal> {
        match &self.detail {
            BreakdownDetail::Buy { .. } => None,
            BreakdownDetail::Sell { disposal, .. } | BreakdownDetail::Trade { disposal, .. } => {
                Some(disposal)
            }
        }
    }

    pub fn disposed_asset(&self) -> Option<&str> {
        match &self.detail {
            BreakdownDetail::Buy { .. } => None,
            BreakdownDetail::Sell { asset, .. } => Some(asset),
            BreakdownDetail::Trade { disposed_asset, .. } => Some(disposed_asset),
        }
    }

    pub fn has_warnings(&self) -> bool {
        self.disposal().is_some_and(|d| !d.warnings.is_empty())
    }
}

/// Running totals over everything processed so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_proceeds: Decimal,
    pub total_cost_base: Decimal,
    pub total_capital_gain: Decimal,
    /// Sum of losses, as a positive amount
    pub total_capital_loss: Decimal,
    pub net_capital_gain: Decimal,
    pub transactions_processed: usize,
    pub buys: usize,
    pub sells: usize,
    pub trades: usize,
}

impl Summary {
    fn record_disposal(&mut self, disposal: &Disposal) {
        self.total_proceeds += disposal.proceeds;
        self.total_cost_base += disposal.cost_base;
        if disposal.capital_gain >= Decimal::ZERO {
            self.total_capital_gain += disposal.capital_gain;
        } else {
            self.total_capital_loss += disposal.capital_gain.abs();
        }
        self.net_capital_gain += disposal.capital_gain;
    }
}

/// Processes one portfolio's transactions. Each engine owns its ledgers
/// outright, so independent portfolios just use independent engines.
#[derive(Debug, Default)]
pub struct FifoEngine {
    options: EngineOptions,
    ledgers: BTreeMap<LedgerKey, AssetLedger>,
    breakdowns: Vec<Breakdown>,
    summary: Summary,
    snapshots: BTreeMap<TaxYear, Vec<LedgerSnapshot>>,
    current_year: Option<TaxYear>,
    last_datetime: Option<NaiveDateTime>,
}

impl FifoEngine {
    pub fn new(options: EngineOptions) -> Self {
        FifoEngine {
            options,
            ..Default::default()
        }
    }

    /// Process a batch in the order given, then snapshot the tax year it ends in.
    ///
    /// Transactions must be sorted by date with the source line breaking ties
    /// (see [`crate::core::sort_transactions`]). A transaction dated before its
    /// predecessor is rejected with [`FifoError::OutOfOrder`]. Processing stops
    /// at the first error; everything before it stays applied.
    pub fn process_transactions(&mut self, transactions: &[Transaction]) -> Result<(), FifoError> {
        log::info!("Processing {} transactions", transactions.len());
        for tx in transactions {
            self.process_transaction(tx)?;
        }
        self.close_tax_year();
        log::info!(
            "Processed {} transactions: {} buys, {} sells, {} trades, net gain {}",
            self.summary.transactions_processed,
            self.summary.buys,
            self.summary.sells,
            self.summary.trades,
            self.summary.net_capital_gain
        );
        Ok(())
    }

    /// Process a single transaction. A rejected transaction leaves the engine
    /// untouched.
    pub fn process_transaction(&mut self, tx: &Transaction) -> Result<(), FifoError> {
        self.check(tx)?;
        let valuation = self
            .value(tx)
            .ok_or(FifoError::Overflow { line: tx.line })?;
        self.enter_tax_year(tx.tax_year());

        match &tx.kind {
            TransactionKind::Buy { acquired, .. } => {
                self.handle_buy(tx, acquired, valuation)?;
                self.summary.buys += 1;
            }
            TransactionKind::Sell { disposed, .. } => {
                self.handle_sell(tx, disposed, valuation)?;
                self.summary.sells += 1;
            }
            TransactionKind::Trade { disposed, acquired } => {
                self.handle_trade(tx, disposed, acquired, valuation)?;
                self.summary.trades += 1;
            }
        }

        self.summary.transactions_processed += 1;
        self.last_datetime = Some(tx.datetime);
        Ok(())
    }

    /// Snapshot the ledgers under the current tax year
    pub fn close_tax_year(&mut self) {
        if let (true, Some(year)) = (self.options.snapshot_tax_years, self.current_year) {
            self.snapshot(year);
        }
    }

    fn check(&self, tx: &Transaction) -> Result<(), FifoError> {
        if let Some(previous) = self.last_datetime {
            if tx.datetime < previous {
                return Err(FifoError::OutOfOrder {
                    line: tx.line,
                    datetime: tx.datetime,
                    previous,
                });
            }
        }

        let too_small = tx
            .kind
            .disposed()
            .filter(|a| a.quantity <= Decimal::ZERO)
            .or(tx.kind.acquired().filter(|a| a.quantity <= EPSILON));
        if let Some(amount) = too_small {
            return Err(FifoError::InvalidQuantity {
                line: tx.line,
                asset: amount.asset.clone(),
                quantity: amount.quantity,
            });
        }

        if let Some(disposed) = tx.kind.disposed() {
            let key = LedgerKey::new(&disposed.asset, tx.wallet.as_deref());
            if !self.ledgers.contains_key(&key) {
                return Err(FifoError::NoBalance { line: tx.line, key });
            }
        }

        Ok(())
    }

    /// `None` if any amount the transaction books, or any running total it
    /// feeds, would overflow.
    fn value(&self, tx: &Transaction) -> Option<Valuation> {
        let mut valuation = Valuation::default();
        match &tx.kind {
            TransactionKind::Buy { acquired, .. } => {
                valuation.total_cost = tx.price.checked_mul(acquired.quantity)?.checked_add(tx.fee)?;
            }
            TransactionKind::Sell { disposed, .. } => {
                valuation.proceeds = tx.price.checked_mul(disposed.quantity)?.checked_sub(tx.fee)?;
            }
            TransactionKind::Trade { acquired, .. } => {
                valuation.proceeds = tx.price.checked_mul(acquired.quantity)?;
                valuation.total_cost = valuation.proceeds.checked_add(tx.fee)?;
            }
        }

        if let Some(disposed) = tx.kind.disposed() {
            let key = LedgerKey::new(&disposed.asset, tx.wallet.as_deref());
            let cost_base = self
                .ledgers
                .get(&key)
                .map_or(Some(Decimal::ZERO), |l| l.cost_of(disposed.quantity))?;
            let gain = valuation.proceeds.checked_sub(cost_base)?;
            let summary = &self.summary;
            summary.total_proceeds.checked_add(valuation.proceeds)?;
            summary.total_cost_base.checked_add(cost_base)?;
            summary.total_capital_gain.checked_add(gain.abs())?;
            summary.total_capital_loss.checked_add(gain.abs())?;
            summary.net_capital_gain.checked_add(gain)?;
        }

        if let Some(acquired) = tx.kind.acquired() {
            valuation.unit_cost = valuation.total_cost.checked_div(acquired.quantity)?;
            acquired.quantity.checked_mul(valuation.unit_cost)?;
            let key = LedgerKey::new(&acquired.asset, tx.wallet.as_deref());
            self.ledgers
                .get(&key)
                .map_or(Decimal::ZERO, AssetLedger::total_quantity)
                .checked_add(acquired.quantity)?;
        }

        Some(valuation)
    }

    fn enter_tax_year(&mut self, year: TaxYear) {
        match self.current_year {
            Some(current) if current != year => {
                if self.options.snapshot_tax_years {
                    self.snapshot(current);
                }
                self.current_year = Some(year);
            }
            Some(_) => {}
            None => self.current_year = Some(year),
        }
    }

    fn snapshot(&mut self, year: TaxYear) {
        log::debug!("Snapshot of {} ledger(s) at end of {}", self.ledgers.len(), year);
        self.snapshots.insert(year, self.balances());
    }

    fn handle_buy(
        &mut self,
        tx: &Transaction,
        acquired: &Amount,
        valuation: Valuation,
    ) -> Result<(), FifoError> {
        let Valuation {
            total_cost,
            unit_cost,
            ..
        } = valuation;
        self.add_lot(tx, acquired, unit_cost)?;

        self.breakdowns.push(Breakdown {
            line: tx.line,
            datetime: tx.datetime,
            tax_year: tx.tax_year(),
            wallet: tx.wallet.clone(),
            fee: tx.fee,
            detail: BreakdownDetail::Buy {
                asset: acquired.asset.clone(),
                quantity: acquired.quantity,
                total_cost,
                unit_cost,
            },
        });
        Ok(())
    }

    fn handle_sell(
        &mut self,
        tx: &Transaction,
        disposed: &Amount,
        valuation: Valuation,
    ) -> Result<(), FifoError> {
        let disposal = self.dispose(tx, disposed, valuation.proceeds)?;

        self.breakdowns.push(Breakdown {
            line: tx.line,
            datetime: tx.datetime,
            tax_year: tx.tax_year(),
            wallet: tx.wallet.clone(),
            fee: tx.fee,
            detail: BreakdownDetail::Sell {
                asset: disposed.asset.clone(),
                quantity: disposed.quantity,
                disposal,
            },
        });
        Ok(())
    }

    /// Sell leg then buy leg. Proceeds are the market value of what is
    /// received, and that same value (plus the fee) becomes the cost of the
    /// new lot.
    fn handle_trade(
        &mut self,
        tx: &Transaction,
        disposed: &Amount,
        acquired: &Amount,
        valuation: Valuation,
    ) -> Result<(), FifoError> {
        let disposal = self.dispose(tx, disposed, valuation.proceeds)?;

        let unit_cost = valuation.unit_cost;
        self.add_lot(tx, acquired, unit_cost)?;

        self.breakdowns.push(Breakdown {
            line: tx.line,
            datetime: tx.datetime,
            tax_year: tx.tax_year(),
            wallet: tx.wallet.clone(),
            fee: tx.fee,
            detail: BreakdownDetail::Trade {
                disposed_asset: disposed.asset.clone(),
                disposed_quantity: disposed.quantity,
                acquired_asset: acquired.asset.clone(),
                acquired_quantity: acquired.quantity,
                acquired_unit_cost: unit_cost,
                disposal,
            },
        });
        Ok(())
    }

    fn add_lot(
        &mut self,
        tx: &Transaction,
        acquired: &Amount,
        unit_cost: Decimal,
    ) -> Result<(), FifoError> {
        let key = LedgerKey::new(&acquired.asset, tx.wallet.as_deref());
        let lot = AcquisitionLot::new(&key, acquired.quantity, unit_cost, tx.datetime, tx.line);
        self.ledgers
            .entry(key.clone())
            .or_insert_with(|| AssetLedger::new(key))
            .add_lot(lot)?;
        Ok(())
    }

    fn dispose(
        &mut self,
        tx: &Transaction,
        disposed: &Amount,
        proceeds: Decimal,
    ) -> Result<Disposal, FifoError> {
        let key = LedgerKey::new(&disposed.asset, tx.wallet.as_deref());
        let ledger = self
            .ledgers
            .get_mut(&key)
            .ok_or_else(|| FifoError::NoBalance {
                line: tx.line,
                key: key.clone(),
            })?;

        let consumption = ledger.consume(disposed.quantity);
        let cost_base = consumption.cost_base();

        let mut warnings = Vec::new();
        if let Some(shortfall) = consumption.shortfall {
            log::warn!(
                "line {}: disposing of {} {} but only {} held; {} has no cost base",
                tx.line,
                shortfall.requested,
                key,
                shortfall.available,
                shortfall.deficit
            );
            warnings.push(Warning::InsufficientBalance {
                requested: shortfall.requested,
                available: shortfall.available,
                deficit: shortfall.deficit,
            });
        }

        let disposal = Disposal {
            proceeds,
            cost_base,
            capital_gain: proceeds - cost_base,
            lots_consumed: consumption.records,
            warnings,
        };
        self.summary.record_disposal(&disposal);
        Ok(disposal)
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Ledgers in key order
    pub fn ledgers(&self) -> impl Iterator<Item = &AssetLedger> {
        self.ledgers.values()
    }

    /// Look up a ledger the way transactions key them: asset trimmed and
    /// uppercased, blank wallet treated as none.
    pub fn ledger(&self, asset: &str, wallet: Option<&str>) -> Option<&AssetLedger> {
        let wallet = wallet.map(str::trim).filter(|w| !w.is_empty());
        self.ledgers
            .get(&LedgerKey::new(&asset.trim().to_uppercase(), wallet))
    }

    pub fn breakdowns(&self) -> &[Breakdown] {
        &self.breakdowns
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Ledger state at the end of each tax year seen so far
    pub fn tax_year_snapshots(&self) -> &BTreeMap<TaxYear, Vec<LedgerSnapshot>> {
        &self.snapshots
    }

    /// Current state of every ledger
    pub fn balances(&self) -> Vec<LedgerSnapshot> {
        self.ledgers.values().map(AssetLedger::snapshot).collect()
    }

    pub fn allocate_disposals(&self) -> BTreeMap<TaxYear, BTreeMap<String, Vec<&Breakdown>>> {
        allocation::allocate_disposals(&self.breakdowns)
    }

    pub fn gain_report(&self, policy: &AllocationPolicy) -> GainReport {
        allocation::calculate_gains(&self.breakdowns, policy)
    }
}
