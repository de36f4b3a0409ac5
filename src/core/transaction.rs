use crate::tax::TaxYear;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use fifotax_derive::CsvSchema;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("line {line}: unsupported transaction kind '{kind}'")]
    UnsupportedKind { line: u64, kind: String },
    #[error("line {line}: {kind} transaction is missing '{field}'")]
    MissingField {
        line: u64,
        kind: &'static str,
        field: &'static str,
    },
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),
}

/// Column description generated by `#[derive(CsvSchema)]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvField {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// A quantity of a single asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Amount {
    pub asset: String,
    #[schemars(with = "f64")]
    pub quantity: Decimal,
}

impl Amount {
    pub fn new(asset: &str, quantity: Decimal) -> Self {
        Amount {
            asset: normalize_asset(asset),
            quantity,
        }
    }
}

/// What a transaction does to the ledgers.
///
/// A trade carries both legs so the engine can dispose of one asset and
/// acquire the other in a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Acquire an asset for the reporting currency
    Buy {
        spent: Option<Amount>,
        acquired: Amount,
    },
    /// Dispose of an asset for the reporting currency
    Sell {
        disposed: Amount,
        received: Option<Amount>,
    },
    /// Exchange one asset directly for another
    Trade { disposed: Amount, acquired: Amount },
}

impl TransactionKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionKind::Buy { .. } => "BUY",
            TransactionKind::Sell { .. } => "SELL",
            TransactionKind::Trade { .. } => "TRADE",
        }
    }

    pub fn disposed(&self) -> Option<&Amount> {
        match self {
            TransactionKind::Buy { .. } => None,
            TransactionKind::Sell { disposed, .. } | TransactionKind::Trade { disposed, .. } => {
                Some(disposed)
            }
        }
    }

    pub fn acquired(&self) -> Option<&Amount> {
        match self {
            TransactionKind::Sell { .. } => None,
            TransactionKind::Buy { acquired, .. } | TransactionKind::Trade { acquired, .. } => {
                Some(acquired)
            }
        }
    }
}

/// A normalised transaction, ready for the FIFO engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Original source line, used for traceability and to order equal timestamps
    pub line: u64,
    pub datetime: NaiveDateTime,
    #[serde(flatten)]
    pub kind: TransactionKind,
    /// Unit price in the reporting currency. For BUY and TRADE this prices the
    /// acquired asset, for SELL the disposed one.
    pub price: Decimal,
    pub fee: Decimal,
    pub wallet: Option<String>,
}

impl Transaction {
    pub fn buy(line: u64, datetime: NaiveDateTime, acquired: Amount, price: Decimal) -> Self {
        Transaction {
            line,
            datetime,
            kind: TransactionKind::Buy {
                spent: None,
                acquired,
            },
            price,
            fee: Decimal::ZERO,
            wallet: None,
        }
    }

    pub fn sell(line: u64, datetime: NaiveDateTime, disposed: Amount, price: Decimal) -> Self {
        Transaction {
            line,
            datetime,
            kind: TransactionKind::Sell {
                disposed,
                received: None,
            },
            price,
            fee: Decimal::ZERO,
            wallet: None,
        }
    }

    pub fn trade(
        line: u64,
        datetime: NaiveDateTime,
        disposed: Amount,
        acquired: Amount,
        price: Decimal,
    ) -> Self {
        Transaction {
            line,
            datetime,
            kind: TransactionKind::Trade { disposed, acquired },
            price,
            fee: Decimal::ZERO,
            wallet: None,
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_wallet(mut self, wallet: &str) -> Self {
        self.wallet = normalize_wallet(Some(wallet.to_string()));
        self
    }

    /// Date portion, which is all the tax year depends on
    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn tax_year(&self) -> TaxYear {
        TaxYear::from_date(self.date())
    }
}

/// Input root for transaction JSON
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransactionInput {
    pub transactions: Vec<TransactionRecord>,
}

/// Flat transaction record, one per CSV row or JSON object
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, CsvSchema)]
pub struct TransactionRecord {
    /// Source line number; defaults to the record's position
    #[serde(default)]
    pub line: Option<u64>,
    /// Transaction time (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339)
    #[serde(deserialize_with = "deserialize_datetime")]
    #[schemars(with = "String")]
    pub date: NaiveDateTime,
    /// BUY, SELL or TRADE
    pub kind: String,
    /// Asset given up (SELL, TRADE; the currency spent for BUY)
    #[serde(default)]
    pub from_asset: Option<String>,
    /// Quantity given up
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub from_amount: Option<Decimal>,
    /// Asset received (BUY, TRADE; the currency received for SELL)
    #[serde(default)]
    pub to_asset: Option<String>,
    /// Quantity received
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub to_amount: Option<Decimal>,
    /// Unit price in the reporting currency (of the acquired asset for BUY and TRADE)
    #[schemars(with = "f64")]
    pub price: Decimal,
    /// Fee in the reporting currency
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub fee: Option<Decimal>,
    /// Wallet identifier; lots are tracked per asset and wallet
    #[serde(default)]
    pub wallet: Option<String>,
}

impl TransactionRecord {
    /// Convert to a typed transaction. `position` is the 1-based index of the
    /// record, used when it carries no explicit line number.
    pub fn into_transaction(self, position: u64) -> Result<Transaction, TransactionError> {
        let line = self.line.unwrap_or(position);
        let from = leg(self.from_asset, self.from_amount);
        let to = leg(self.to_asset, self.to_amount);

        let kind = match self.kind.trim().to_uppercase().as_str() {
            "BUY" => TransactionKind::Buy {
                spent: from,
                acquired: to.ok_or(TransactionError::MissingField {
                    line,
                    kind: "BUY",
                    field: "to_asset/to_amount",
                })?,
            },
            "SELL" => TransactionKind::Sell {
                disposed: from.ok_or(TransactionError::MissingField {
                    line,
                    kind: "SELL",
                    field: "from_asset/from_amount",
                })?,
                received: to,
            },
            "TRADE" => TransactionKind::Trade {
                disposed: from.ok_or(TransactionError::MissingField {
                    line,
                    kind: "TRADE",
                    field: "from_asset/from_amount",
                })?,
                acquired: to.ok_or(TransactionError::MissingField {
                    line,
                    kind: "TRADE",
                    field: "to_asset/to_amount",
                })?,
            },
            _ => {
                return Err(TransactionError::UnsupportedKind {
                    line,
                    kind: self.kind,
                })
            }
        };

        Ok(Transaction {
            line,
            datetime: self.date,
            kind,
            price: self.price,
            fee: self.fee.unwrap_or(Decimal::ZERO),
            wallet: normalize_wallet(self.wallet),
        })
    }
}

fn leg(asset: Option<String>, quantity: Option<Decimal>) -> Option<Amount> {
    match (asset, quantity) {
        (Some(asset), Some(quantity)) if !asset.trim().is_empty() => {
            Some(Amount::new(&asset, quantity))
        }
        _ => None,
    }
}

/// Convert records in file order
pub fn records_to_transactions(
    records: Vec<TransactionRecord>,
) -> Result<Vec<Transaction>, TransactionError> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| record.into_transaction(i as u64 + 1))
        .collect()
}

/// Read transactions from JSON (`{"transactions": [...]}`). Input order is kept.
pub fn read_transactions_json<R: Read>(reader: R) -> anyhow::Result<Vec<Transaction>> {
    let input: TransactionInput = serde_json::from_reader(reader)?;
    Ok(records_to_transactions(input.transactions)?)
}

/// Read transactions from CSV with a header row. Input order is kept.
pub fn read_transactions_csv<R: Read>(reader: R) -> anyhow::Result<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let records = rdr
        .deserialize()
        .collect::<Result<Vec<TransactionRecord>, _>>()?;
    Ok(records_to_transactions(records)?)
}

/// Chronological order with the source line as tie-breaker. Stable, so
/// records sharing both keep their input order.
pub fn sort_transactions(transactions: &mut [Transaction]) {
    transactions.sort_by_key(|t| (t.datetime, t.line));
}

fn normalize_asset(s: &str) -> String {
    s.trim().to_uppercase()
}

fn normalize_wallet(wallet: Option<String>) -> Option<String> {
    wallet
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
}

pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, TransactionError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(TransactionError::InvalidDatetime(s.to_string()))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_datetime(&s).map_err(|err| serde::de::Error::custom(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dt(s: &str) -> NaiveDateTime {
        parse_datetime(s).unwrap()
    }

    fn record(kind: &str) -> TransactionRecord {
        TransactionRecord {
            line: None,
            date: dt("2024-03-10"),
            kind: kind.to_string(),
            from_asset: None,
            from_amount: None,
            to_asset: None,
            to_amount: None,
            price: dec!(1000),
            fee: None,
            wallet: None,
        }
    }

    #[test]
    fn parse_datetime_formats() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(dt("2024-03-01"), midnight);
        assert_eq!(dt("2024-03-01 00:00:00"), midnight);
        assert_eq!(dt("2024-03-01T00:00:00"), midnight);
        assert_eq!(dt("2024-03-01T00:00:00.000"), midnight);
        assert_eq!(dt("2024-03-01T02:00:00+02:00"), midnight);
        assert!(matches!(
            parse_datetime("01/03/2024"),
            Err(TransactionError::InvalidDatetime(_))
        ));
    }

    #[test]
    fn buy_record_requires_acquired_leg() {
        let err = record("BUY").into_transaction(3).unwrap_err();
        assert_eq!(
            err,
            TransactionError::MissingField {
                line: 3,
                kind: "BUY",
                field: "to_asset/to_amount",
            }
        );
    }

    #[test]
    fn trade_record_converts_to_both_legs() {
        let mut r = record("trade");
        r.line = Some(42);
        r.from_asset = Some(" btc ".to_string());
        r.from_amount = Some(dec!(0.1));
        r.to_asset = Some("eth".to_string());
        r.to_amount = Some(dec!(2));
        r.fee = Some(dec!(15));
        r.wallet = Some("  ".to_string());

        let tx = r.into_transaction(1).unwrap();
        assert_eq!(tx.line, 42);
        assert_eq!(tx.fee, dec!(15));
        assert_eq!(tx.wallet, None);
        assert_eq!(
            tx.kind,
            TransactionKind::Trade {
                disposed: Amount::new("BTC", dec!(0.1)),
                acquired: Amount::new("ETH", dec!(2)),
            }
        );
        assert_eq!(tx.kind.name(), "TRADE");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = record("TRANSFER").into_transaction(7).unwrap_err();
        assert_eq!(
            err,
            TransactionError::UnsupportedKind {
                line: 7,
                kind: "TRANSFER".to_string(),
            }
        );
    }

    #[test]
    fn read_csv_with_optional_columns() {
        let data = "\
line,date,kind,from_asset,from_amount,to_asset,to_amount,price,fee,wallet
1,2024-01-01,BUY,ZAR,10000,BTC,0.5,20000,100,
2,2024-01-03 12:30:00,SELL,BTC,0.25,,,50000,,Luno
";
        let txs = read_transactions_csv(data.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);

        assert_eq!(txs[0].fee, dec!(100));
        assert_eq!(txs[0].wallet, None);
        assert_eq!(txs[0].kind.acquired(), Some(&Amount::new("BTC", dec!(0.5))));

        assert_eq!(txs[1].fee, Decimal::ZERO);
        assert_eq!(txs[1].wallet.as_deref(), Some("Luno"));
        assert_eq!(txs[1].kind.disposed(), Some(&Amount::new("BTC", dec!(0.25))));
        assert_eq!(txs[1].datetime, dt("2024-01-03T12:30:00"));
    }

    #[test]
    fn read_json_defaults_line_to_position() {
        let data = r#"{
            "transactions": [
                {"date": "2024-01-01", "kind": "BUY", "to_asset": "BTC", "to_amount": "1", "price": "20000"},
                {"date": "2024-02-01", "kind": "SELL", "from_asset": "BTC", "from_amount": 0.5, "price": 30000, "fee": 10}
            ]
        }"#;
        let txs = read_transactions_json(data.as_bytes()).unwrap();
        assert_eq!(txs[0].line, 1);
        assert_eq!(txs[1].line, 2);
        assert_eq!(txs[1].price, dec!(30000));
        assert_eq!(txs[1].fee, dec!(10));
    }

    #[test]
    fn sort_uses_line_as_tie_breaker() {
        let btc = Amount::new("BTC", dec!(1));
        let mut txs = vec![
            Transaction::sell(3, dt("2024-01-02"), btc.clone(), dec!(1)),
            Transaction::buy(2, dt("2024-01-01"), btc.clone(), dec!(1)),
            Transaction::buy(1, dt("2024-01-01"), btc.clone(), dec!(1)),
        ];
        sort_transactions(&mut txs);
        let lines: Vec<_> = txs.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn tax_year_of_transaction() {
        let tx = Transaction::buy(1, dt("2024-02-29"), Amount::new("btc", dec!(1)), dec!(1));
        assert_eq!(tx.tax_year(), TaxYear(2023));
    }

    #[test]
    fn csv_schema_lists_columns_in_order() {
        let schema = TransactionRecord::csv_schema();
        let names: Vec<_> = schema.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec![
                "line",
                "date",
                "kind",
                "from_asset",
                "from_amount",
                "to_asset",
                "to_amount",
                "price",
                "fee",
                "wallet"
            ]
        );
        let required: Vec<_> = schema.iter().filter(|f| f.required).map(|f| f.name).collect();
        assert_eq!(required, vec!["date", "kind", "price"]);
    }
}
