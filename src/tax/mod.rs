pub mod allocation;
pub mod fifo;
pub mod ledger;
pub mod year;

pub use allocation::{
    allocate_disposals, calculate_gains, AllocationPolicy, AssetGains, GainReport, TaxYearGains,
};
pub use fifo::{
    Breakdown, BreakdownDetail, Disposal, EngineOptions, FifoEngine, FifoError, Summary,
};
pub use ledger::{
    AcquisitionLot, AssetLedger, Consumption, ConsumptionRecord, LedgerError, LedgerKey,
    LedgerSnapshot, Shortfall, EPSILON,
};
pub use year::{is_leap_year, ParseTaxYearError, TaxYear};
