//! Sluice CLI: the `sluice` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level);
    let global = cli.global;

    match cli.command {
        Commands::Register {
            file,
            correlation_id,
            json,
        } => commands::register::run(&global, file, correlation_id, json),

        Commands::Signal {
            correlation_id,
            json,
        } => commands::signal::run(&global, correlation_id, json),

        Commands::Ingest { file, json } => commands::ingest::run(&global, file, json),

        Commands::Pipes { pipe, exports } => commands::pipes::run(&global, pipe, exports),

        Commands::Receipts { run, snapshot } => commands::receipts::run(&global, run, snapshot),

        Commands::Rows { run, pipe, source } => commands::rows::run(&global, run, pipe, source),

        Commands::Drift => commands::drift::run(&global),

        Commands::Schemas { pipe } => commands::schemas::run(&global, pipe),

        Commands::Stats => commands::stats::run(&global),

        Commands::Dispatches { id } => commands::dispatches::run(&global, id),

        Commands::Batches { snapshot, gap_secs } => {
            commands::batches::run(&global, snapshot, gap_secs)
        }

        Commands::Reset { yes } => commands::reset::run(&global, yes),
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` takes
/// precedence over `--log-level`; an unparsable directive falls back to `info`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();
}
