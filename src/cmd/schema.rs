//! Schema command - print expected input formats

use clap::Args;
use fifotax::core::{TransactionInput, TransactionRecord};
use schemars::schema_for;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Output format: json-schema, csv-header or csv-fields
    #[arg(value_enum, default_value = "json-schema")]
    format: SchemaFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaFormat {
    /// JSON Schema for the input format
    JsonSchema,
    /// CSV header row with column names
    CsvHeader,
    /// CSV column descriptions
    CsvFields,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        match self.format {
            SchemaFormat::JsonSchema => {
                let schema = schema_for!(TransactionInput);
                println!("{}", serde_json::to_string_pretty(&schema)?);
            }
            SchemaFormat::CsvHeader => {
                let names: Vec<_> = TransactionRecord::csv_schema()
                    .iter()
                    .map(|f| f.name)
                    .collect();
                println!("{}", names.join(","));
            }
            SchemaFormat::CsvFields => {
                println!("CSV Input Format");
                println!("================");
                println!();
                for field in TransactionRecord::csv_schema() {
                    let req = if field.required { "required" } else { "optional" };
                    println!("{:12} ({:8})  {}", field.name, req, field.description);
                }
                println!();
                println!("Amounts and prices are in the reporting currency (ZAR).");
            }
        }
        Ok(())
    }
}
