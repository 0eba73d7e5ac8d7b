use crate::commands;
use crate::config::CliConfig;
use cincan::provenance::LogStore;
use cincan::{DockerRuntime, SharedRuntime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

const HOME_DIR_NAME: &str = ".cincan";

#[derive(Parser, Debug)]
#[command(name = "cincan", version, about = "Run command line tools in containers")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a tool, moving files named on the command line in and out
    Run(commands::run::RunArgs),
    /// Check that a tool image works with file transfer
    Test(commands::run::RunArgs),
    /// Show the commands that produced the given file
    Fanin(commands::lineage::LineageArgs),
    /// Show the commands that consumed the given file
    Fanout(commands::lineage::LineageArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[value(alias = "warning")]
    Warn,
    #[value(alias = "critical")]
    Error,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Directory holding configuration and command logs (default ~/.cincan)
    #[arg(long, global = true, env = "CINCAN_HOME", value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Set the logging level
    #[arg(short = 'l', long = "log-level", global = true, ignore_case = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl GlobalFlags {
    /// Filter directive from the flags, `None` defers to `RUST_LOG`.
    pub fn log_directive(&self) -> Option<&'static str> {
        match (self.log_level, self.quiet) {
            (Some(level), _) => Some(level.directive()),
            (None, true) => Some(LogLevel::Warn.directive()),
            (None, false) => None,
        }
    }

    pub fn home_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(home) = &self.home {
            return Ok(home.clone());
        }
        dirs::home_dir()
            .map(|h| h.join(HOME_DIR_NAME))
            .ok_or_else(|| anyhow::anyhow!("Cannot determine the home directory, use --home"))
    }

    pub fn config(&self) -> anyhow::Result<CliConfig> {
        CliConfig::load(&self.home_dir()?)
    }

    pub fn log_store(&self) -> anyhow::Result<LogStore> {
        Ok(LogStore::new(self.home_dir()?))
    }

    pub fn create_runtime(&self) -> anyhow::Result<SharedRuntime> {
        let docker_host = std::env::var("DOCKER_HOST").ok();
        let runtime = DockerRuntime::from_docker_host(docker_host.as_deref())?;
        Ok(Arc::new(runtime))
    }
}
