//! tilestore-explain CLI
//!
//! Shows how a store configuration is addressed and which registers each
//! element of a tile receives.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tilestore::StoreConfig;
use tilestore_explain::{output, plan, requirements, ConfigFile, OutputFormat, PlanRequest, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilestore-explain")]
#[command(author, version, about = "Store-path register planning inspector")]
#[command(long_about = "
Builds the store state of one (gwvw, edge, beta, atomic) configuration
and reports the addressing strategy, register requirements and the
registers planned for every element of a synthetic tile.

Set RUST_LOG for planner tracing (default: warn).
")]
struct Cli {
    /// Log planner decisions (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Kernel description (JSON); defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Global write vector width
    #[arg(long, default_value = "1")]
    gwvw: u32,

    /// Boundary tile
    #[arg(long)]
    edge: bool,

    /// Read and accumulate the existing output
    #[arg(long)]
    beta: bool,

    /// Atomic writes
    #[arg(long)]
    atomic: bool,

    /// Vector register limit
    #[arg(long, default_value = "256")]
    max_vgprs: u32,

    /// Scalar register limit
    #[arg(long, default_value = "104")]
    max_sgprs: u32,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl StoreArgs {
    fn store(&self) -> StoreConfig {
        StoreConfig::new(self.gwvw, self.edge, self.beta, self.atomic)
    }

    fn config(&self) -> Result<ConfigFile> {
        match &self.config {
            Some(path) => ConfigFile::load(path),
            None => Ok(ConfigFile::default()),
        }
    }

    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a synthetic tile and show every element's registers
    Plan {
        #[command(flatten)]
        store: StoreArgs,

        /// Tile rows
        #[arg(long, default_value = "4")]
        rows: u32,

        /// Tile columns, in units of gwvw
        #[arg(long, default_value = "4")]
        cols: u32,

        /// Elements per batch (capped by the scalar budget)
        #[arg(long, default_value = "8")]
        batch: usize,
    },

    /// Show the addressing strategy and register requirements only
    Requirements {
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Plan {
            store,
            rows,
            cols,
            batch,
        } => {
            let request = PlanRequest {
                config: store.config()?,
                store: store.store(),
                rows,
                cols,
                batch,
                max_vgprs: store.max_vgprs,
                max_sgprs: store.max_sgprs,
            };
            let report = plan(&request)?;
            output::write_plan(&report, store.format())?;
        }

        Commands::Requirements { store } => {
            let report = requirements(&store.config()?, store.store(), store.max_vgprs, store.max_sgprs)?;
            output::write_requirements(&report, store.format())?;
        }
    }

    Ok(())
}
