use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser, Debug)]
#[command(name = "fifotax", version, about = "FIFO capital gains for crypto assets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gains per tax year and asset, after the annual exclusion
    Report(cmd::report::ReportCommand),
    /// Per-transaction breakdown with the lots each disposal consumed
    Breakdown(cmd::breakdown::BreakdownCommand),
    /// Ledger balances at the end of each tax year
    Ledgers(cmd::ledgers::LedgersCommand),
    /// Describe the accepted input formats
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Report(report) => report.exec(),
        Command::Breakdown(breakdown) => breakdown.exec(),
        Command::Ledgers(ledgers) => ledgers.exec(),
        Command::Schema(schema) => schema.exec(),
    }
}
