use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Domain warnings attached to breakdowns during processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum Warning {
    /// Ledger held less than the disposal asked for. Everything available was
    /// consumed; the `deficit` units carry no cost base.
    InsufficientBalance {
        #[schemars(with = "f64")]
        requested: Decimal,
        #[schemars(with = "f64")]
        available: Decimal,
        #[schemars(with = "f64")]
        deficit: Decimal,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::InsufficientBalance {
                requested,
                available,
                deficit,
            } => write!(
                f,
                "insufficient balance: requested {}, available {}, deficit {}",
                requested.normalize(),
                available.normalize(),
                deficit.normalize()
            ),
        }
    }
}
