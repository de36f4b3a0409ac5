use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Quantities at or below this are treated as zero
pub const EPSILON: Decimal = dec!(0.00000001);

const DEFAULT_WALLET: &str = "DEFAULT";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("cannot add {found} lot to {expected} ledger")]
    TypeMismatch { expected: LedgerKey, found: LedgerKey },
}

/// Identifies one ledger: an asset, optionally scoped to a wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LedgerKey {
    pub asset: String,
    pub wallet: Option<String>,
}

impl LedgerKey {
    pub fn new(asset: &str, wallet: Option<&str>) -> Self {
        LedgerKey {
            asset: asset.to_string(),
            wallet: wallet.map(str::to_string),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}",
            self.asset,
            self.wallet.as_deref().unwrap_or(DEFAULT_WALLET)
        )
    }
}

/// A parcel of an asset acquired in one transaction.
///
/// Only the remaining quantity changes after creation, and only downwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionLot {
    asset: String,
    wallet: Option<String>,
    quantity: Decimal,
    unit_cost: Decimal,
    acquired: NaiveDateTime,
    source_line: u64,
}

impl AcquisitionLot {
    pub fn new(
        key: &LedgerKey,
        quantity: Decimal,
        unit_cost: Decimal,
        acquired: NaiveDateTime,
        source_line: u64,
    ) -> Self {
        AcquisitionLot {
            asset: key.asset.clone(),
            wallet: key.wallet.clone(),
            quantity,
            unit_cost,
            acquired,
            source_line,
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(&self.asset, self.wallet.as_deref())
    }

    /// Remaining quantity
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Fee-inclusive cost per unit in the reporting currency
    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn acquired(&self) -> NaiveDateTime {
        self.acquired
    }

    pub fn source_line(&self) -> u64 {
        self.source_line
    }

    /// Cost of the remaining quantity
    pub fn cost_base(&self) -> Decimal {
        self.quantity * self.unit_cost
    }

    pub fn is_exhausted(&self) -> bool {
        self.quantity <= EPSILON
    }
}

/// One lot's contribution to a disposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionRecord {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub cost_base: Decimal,
    pub acquired: NaiveDateTime,
    pub source_line: u64,
}

/// Disposal asked for more than the ledger held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub requested: Decimal,
    pub available: Decimal,
    pub deficit: Decimal,
}

/// Result of consuming from a ledger, oldest lot first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumption {
    pub records: Vec<ConsumptionRecord>,
    pub shortfall: Option<Shortfall>,
}

impl Consumption {
    pub fn cost_base(&self) -> Decimal {
        self.records.iter().map(|r| r.cost_base).sum()
    }

    pub fn quantity(&self) -> Decimal {
        self.records.iter().map(|r| r.quantity).sum()
    }
}

/// FIFO queue of acquisition lots for one asset (and wallet).
///
/// Lots are appended in acquisition order and consumed from the front; the
/// queue is never re-sorted. `total` always equals the sum of remaining lot
/// quantities.
#[derive(Debug, Clone)]
pub struct AssetLedger {
    key: LedgerKey,
    lots: VecDeque<AcquisitionLot>,
    total: Decimal,
}

impl AssetLedger {
    pub fn new(key: LedgerKey) -> Self {
        AssetLedger {
            key,
            lots: VecDeque::new(),
            total: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    pub fn asset(&self) -> &str {
        &self.key.asset
    }

    pub fn wallet(&self) -> Option<&str> {
        self.key.wallet.as_deref()
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total
    }

    pub fn lots(&self) -> impl Iterator<Item = &AcquisitionLot> {
        self.lots.iter()
    }

    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    /// Append a lot to the back of the queue
    pub fn add_lot(&mut self, lot: AcquisitionLot) -> Result<(), LedgerError> {
        let found = lot.key();
        if found != self.key {
            return Err(LedgerError::TypeMismatch {
                expected: self.key.clone(),
                found,
            });
        }

        self.total += lot.quantity;
        log::debug!(
            "Ledger {} ADD: qty={} @ {} (line {}). New total: qty={}, lots={}",
            self.key,
            lot.quantity,
            lot.unit_cost,
            lot.source_line,
            self.total,
            self.lots.len() + 1
        );
        self.lots.push_back(lot);
        Ok(())
    }

    /// Quantities `consume(amount)` takes from each lot, front first. A lot
    /// that would be left holding `EPSILON` or less is taken whole.
    fn plan(&self, amount: Decimal) -> Vec<Decimal> {
        let mut remaining = amount;
        let mut takes = Vec::new();
        for lot in &self.lots {
            if remaining <= Decimal::ZERO {
                break;
            }
            let mut taken = remaining.min(lot.quantity);
            remaining -= taken;
            if lot.quantity - taken <= EPSILON {
                taken = lot.quantity;
            }
            takes.push(taken);
        }
        takes
    }

    /// Cost base `consume(amount)` would report, or `None` if it does not
    /// fit in a `Decimal`. Leaves the ledger untouched.
    pub fn cost_of(&self, amount: Decimal) -> Option<Decimal> {
        self.plan(amount)
            .into_iter()
            .zip(&self.lots)
            .try_fold(Decimal::ZERO, |cost, (taken, lot)| {
                cost.checked_add(taken.checked_mul(lot.unit_cost)?)
            })
    }

    /// Consume `amount` from the front of the queue, splitting the last lot
    /// touched if only part of it is needed.
    ///
    /// Never fails: if the ledger holds less than `amount` (beyond `EPSILON`)
    /// everything available is consumed and the gap is reported as a
    /// [`Shortfall`]. Costs are multiplied unchecked; check [`Self::cost_of`]
    /// first when they may be out of range.
    pub fn consume(&mut self, amount: Decimal) -> Consumption {
        let available = self.total;
        let mut records = Vec::new();

        for taken in self.plan(amount) {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };

            lot.quantity -= taken;
            self.total -= taken;
            records.push(ConsumptionRecord {
                quantity: taken,
                unit_cost: lot.unit_cost,
                cost_base: taken * lot.unit_cost,
                acquired: lot.acquired,
                source_line: lot.source_line,
            });

            if lot.is_exhausted() {
                self.lots.pop_front();
            }
        }

        let consumed: Decimal = records.iter().map(|r| r.quantity).sum();
        let deficit = amount - consumed;
        let shortfall = (deficit > EPSILON).then_some(Shortfall {
            requested: amount,
            available,
            deficit,
        });

        log::debug!(
            "Ledger {} CONSUME: qty={} from {} lot(s). Remaining: qty={}, lots={}",
            self.key,
            amount,
            records.len(),
            self.total,
            self.lots.len()
        );

        Consumption { records, shortfall }
    }

    /// Cost of everything still held
    pub fn total_cost_base(&self) -> Decimal {
        self.lots.iter().map(AcquisitionLot::cost_base).sum()
    }

    pub fn average_unit_cost(&self) -> Decimal {
        if self.total <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.total_cost_base() / self.total
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            asset: self.key.asset.clone(),
            wallet: self.key.wallet.clone(),
            quantity: self.total,
            cost_base: self.total_cost_base(),
            average_unit_cost: self.average_unit_cost(),
            lot_count: self.lots.len(),
            lots: self.lots.iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of a ledger's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub asset: String,
    pub wallet: Option<String>,
    pub quantity: Decimal,
    pub cost_base: Decimal,
    pub average_unit_cost: Decimal,
    pub lot_count: usize,
    pub lots: Vec<AcquisitionLot>,
}
