mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands, GlobalFlags};
use commands::lineage::Direction;
use std::io::IsTerminal;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_LEVEL: &str = "info";

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.global),
        Commands::Test(args) => commands::run::check(args, &cli.global),
        Commands::Fanin(args) => commands::lineage::execute(args, Direction::In, &cli.global),
        Commands::Fanout(args) => commands::lineage::execute(args, Direction::Out, &cli.global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Log to stderr as `<target>: <message>`.
///
/// `--log-level` wins over `--quiet`, which wins over `RUST_LOG`.
fn init_logging(global: &GlobalFlags) {
    let filter = match global.log_directive() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_level(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .try_init();
}
