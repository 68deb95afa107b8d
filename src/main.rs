use calcframe::cli;
use calcframe::core::FieldSurface;
use calcframe::error::FormulaResult;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "calcframe")]
#[command(about = "Evaluate custom-calculation formulas against tabular data.")]
#[command(long_about = "calcframe - custom-calculation formulas over dataframes

Formulas refer to fields by their display labels and are evaluated row by
row in a sandboxed JavaScript-like language. Formulas that mention rowValues
or rowSet see the whole dataset, sorted by its dimensions, and can use the
cross-row helpers sum, movingAverage, cumulativeSum, differenceFromPrevious,
valuesWithDimension and valuesByDimension.

COMMANDS:
  evaluate    - Evaluate a session's formula for every row
  validate    - Check that formulas compile
  translate   - Rewrite a formula between label, backend and execution form

EXAMPLES:
  calcframe evaluate session.yaml
  calcframe evaluate session.yaml --json
  calcframe validate a.yaml b.json
  calcframe translate session.yaml --to backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Evaluate the formula of a session file for every row.

A session file (YAML or JSON) holds the formula, the fields it may reference,
per-field configuration, the dimension ids and the rows:

  formula: \"Sales - Cost\"
  fields:
    - { id: sales, label: Sales }
    - { id: cost, label: Cost }
  configuration:
    cost: { treat_missing_as_zero: true }
  dimensions: [month]
  rows:
    - { month: 1, sales: 100, cost: 40 }

Results are printed in input row order; rows without a result print null.")]
    /// Evaluate a formula for every row of a session file
    Evaluate {
        /// Path to the session file (.yaml or .json)
        file: PathBuf,

        /// Engine options file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Step budget per row evaluation
        #[arg(long, env = "CALCFRAME_MAX_STEPS")]
        max_steps: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Show the compiled formula
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check that session files load and their formulas compile
    Validate {
        /// Session file(s) to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Rewrite a session's formula between field spellings
    Translate {
        /// Path to the session file
        file: PathBuf,

        /// Spelling the formula is written in (label, backend, execution)
        #[arg(long, default_value = "label")]
        from: FieldSurface,

        /// Spelling to produce (label, backend, execution)
        #[arg(long)]
        to: FieldSurface,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calcframe=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> FormulaResult<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Evaluate {
            file,
            config,
            max_steps,
            json,
            verbose,
        } => cli::evaluate(file, config, max_steps, json, verbose),

        Commands::Validate { files } => cli::validate(files),

        Commands::Translate { file, from, to } => cli::translate(file, from, to),
    }
}
