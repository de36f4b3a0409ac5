pub mod transaction;
pub mod warnings;

pub use transaction::{
    parse_datetime, read_transactions_csv, read_transactions_json, records_to_transactions,
    sort_transactions, Amount, CsvField, Transaction, TransactionError, TransactionInput,
    TransactionKind, TransactionRecord,
};
pub use warnings::Warning;
