pub mod breakdown;
pub mod ledgers;
pub mod report;
pub mod schema;

use fifotax::core::{self as input, Transaction};
use fifotax::tax::{EngineOptions, FifoEngine};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Read transactions (or stdin with "-"), sort them and run the engine
pub fn run_engine(path: &Path, options: EngineOptions) -> anyhow::Result<FifoEngine> {
    let mut transactions = read_transactions(path)?;
    input::sort_transactions(&mut transactions);

    let mut engine = FifoEngine::new(options);
    engine.process_transactions(&transactions)?;
    Ok(engine)
}

/// `.json` files are read as JSON, anything else as CSV. Stdin is JSON.
pub fn read_transactions(path: &Path) -> anyhow::Result<Vec<Transaction>> {
    if path.as_os_str() == "-" {
        return read_from_stdin();
    }

    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        input::read_transactions_json(reader)
    } else {
        input::read_transactions_csv(reader)
    }
}

fn read_from_stdin() -> anyhow::Result<Vec<Transaction>> {
    let mut buffer = Vec::new();
    io::stdin().lock().read_to_end(&mut buffer)?;

    if buffer.is_empty() {
        anyhow::bail!("No input received. Provide a file or pipe data to stdin.");
    }

    input::read_transactions_json(io::Cursor::new(buffer))
}

fn format_zar(amount: Decimal) -> String {
    if amount < Decimal::ZERO {
        format!("-R{:.2}", amount.abs())
    } else {
        format!("R{:.2}", amount)
    }
}

fn format_quantity(qty: Decimal) -> String {
    let s = format!("{:.8}", qty);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn format_quantity_trims_zeros() {
        assert_eq!(format_quantity(dec!(1.50000000)), "1.5");
        assert_eq!(format_quantity(dec!(2)), "2");
        assert_eq!(format_quantity(dec!(0.00000001)), "0.00000001");
    }

    #[test]
    fn format_zar_signs() {
        assert_eq!(format_zar(dec!(1234.5)), "R1234.50");
        assert_eq!(format_zar(dec!(-20000)), "-R20000.00");
    }
}
