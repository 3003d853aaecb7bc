use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sluice",
    about = "Sluice: structure-before-content ingestion gateway with bounded buffering",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Durable state file (file-backed cache)
    #[arg(long, global = true, default_value = ".sluice/state.json")]
    pub state: PathBuf,

    /// Gateway config (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter directive written to stderr (e.g. `warn`, `sluice_core=debug`);
    /// `RUST_LOG` overrides it
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Declare structure: register a batch of pipe definitions
    Register {
        /// JSON file holding an array of pipe definitions
        file: PathBuf,

        /// Correlation id for the batch (generated when omitted)
        #[arg(long)]
        correlation_id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Signal that a dispatch has been launched
    Signal {
        /// Correlation / dispatch id
        correlation_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Push content for one (run, pipe)
    Ingest {
        /// JSON file holding one content push
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered pipe definitions
    Pipes {
        /// Show one pipe only
        #[arg(long)]
        pipe: Option<String>,

        /// Show export history instead of definitions
        #[arg(long)]
        exports: bool,
    },

    /// List run receipts (oldest first)
    Receipts {
        /// Only receipts for this run id
        #[arg(long, conflicts_with = "snapshot")]
        run: Option<String>,

        /// Only receipts for this snapshot name
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Show buffered rows for one (run, pipe) or one source
    Rows {
        /// Run id
        #[arg(long, requires = "pipe", conflicts_with = "source")]
        run: Option<String>,

        /// Pipe id
        #[arg(long, requires = "run")]
        pipe: Option<String>,

        /// Canonical source id
        #[arg(long)]
        source: Option<String>,
    },

    /// List schema drift events (oldest first)
    Drift,

    /// Show the schema registry, or one pipe's record
    Schemas {
        /// Pipe id
        #[arg(long)]
        pipe: Option<String>,
    },

    /// Ingest store counters
    Stats,

    /// Show dispatch rollups, or one dispatch
    Dispatches {
        /// Dispatch id
        id: Option<String>,
    },

    /// Advisory time-gap batches over one snapshot
    Batches {
        /// Snapshot name
        snapshot: String,

        /// Gap threshold in seconds (config `batch_gap_secs` when omitted)
        #[arg(long)]
        gap_secs: Option<u64>,
    },

    /// Drop all gateway state, in memory and on disk
    Reset {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}
