use clap::{Parser, Subcommand};
use sheetport::cli;
use sheetport::error::SheetPortResult;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetport")]
#[command(about = "Populate spreadsheet templates from JSON, and extract JSON back out")]
#[command(long_about = "sheetport - declarative JSON <-> spreadsheet mapping

Templates address their data through named ranges (single cells) and tables.
Export walks a JSON payload and fills the matching items, replicating the
template's styling, data validation and conditional formatting down generated
table rows. Import reads the populated workbook back into structured JSON.

EXAMPLES:
  sheetport export order.xlsx payload.json -o out.xlsx
  sheetport import out.xlsx --request fields.json
  sheetport inspect order.xlsx")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate an xlsx template with JSON data
    Export {
        /// Path to the xlsx template
        template: PathBuf,

        /// Path to the JSON payload (top-level object)
        data: PathBuf,

        /// Where to write the populated workbook
        #[arg(short, long, default_value = "out.xlsx")]
        output: PathBuf,

        /// Write values only, skipping style/validation/formatting replication
        #[arg(long)]
        values_only: bool,
    },

    /// Extract JSON from an xlsx workbook
    Import {
        /// Path to the populated workbook
        workbook: PathBuf,

        /// JSON request naming the properties/tables to extract (default: everything)
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Read statically cached formula results instead of evaluating
        #[arg(long)]
        no_evaluate: bool,

        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List a template's addressable items
    Inspect {
        /// Path to the xlsx workbook
        workbook: PathBuf,

        /// Diff against another workbook and report the differences
        #[arg(long)]
        diff: Option<PathBuf>,
    },
}

fn main() -> SheetPortResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Export {
            template,
            data,
            output,
            values_only,
        } => cli::export(template, data, output, values_only),
        Commands::Import {
            workbook,
            request,
            no_evaluate,
            output,
        } => cli::import(workbook, request, no_evaluate, output),
        Commands::Inspect { workbook, diff } => cli::inspect(workbook, diff),
    }
}
