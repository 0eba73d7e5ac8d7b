use anyhow::Context;
use cincan::provenance::{CommandInspector, CommandLogIndex, hash_file};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct LineageArgs {
    /// File to analyze
    pub file: PathBuf,

    /// Maximum tree depth
    #[arg(short = 'd', long = "max-depth", default_value_t = 3)]
    pub max_depth: usize,
}

#[derive(Clone, Copy, Debug)]
pub enum Direction {
    In,
    Out,
}

/// Print the fan-in or fan-out tree of a file from the stored command logs.
pub fn execute(
    args: LineageArgs,
    direction: Direction,
    global: &crate::cli::GlobalFlags,
) -> anyhow::Result<i32> {
    let work_dir = std::env::current_dir().context("Cannot read the current directory")?;
    let file = std::path::absolute(&args.file)
        .with_context(|| format!("Invalid path {}", args.file.display()))?;
    let digest = hash_file(&file)?;

    let index = CommandLogIndex::load(&global.log_store()?)?;
    tracing::debug!("{} command logs loaded", index.len());
    let inspector = CommandInspector::new(&index, work_dir);
    let tree = match direction {
        Direction::In => inspector.fanin(&file, &digest, args.max_depth),
        Direction::Out => inspector.fanout(&file, &digest, args.max_depth),
    };
    print!("{}", inspector.render(&tree));
    Ok(0)
}
