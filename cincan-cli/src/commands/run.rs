use cincan::provenance::CommandLogWriter;
use cincan::{CommandLog, ContainerCheck, RunOptions, ToolImage};
use clap::Args;
use std::io::Write;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Provide the input files to load unfiltered into the container working directory ('-' for stdin)
    #[arg(long = "in", value_name = "TAR", allow_hyphen_values = true)]
    pub input_tar: Option<String>,

    /// Write output files into the given tar archive ('-' for stdout)
    #[arg(long = "out", value_name = "TAR", allow_hyphen_values = true)]
    pub output_tar: Option<String>,

    /// Filter input files by pattern (* as wildcard, ^-prefix for inverse filter)
    #[arg(short = 'I', long = "in-filter", value_name = "PATTERN")]
    pub in_filter: Vec<String>,

    /// Include output files by pattern (* as wildcard, ^-prefix for inverse filter)
    #[arg(short = 'O', long = "out-filter", value_name = "PATTERN")]
    pub out_filter: Vec<String>,

    /// Force an empty directory to the container and collect it back
    #[arg(short = 'd', long = "mkdir", value_name = "DIR")]
    pub mkdir: Vec<String>,

    /// Ignore the output filters shipped in the image (.cincanignore)
    #[arg(long)]
    pub no_defaults: bool,

    /// Only download the directories given with --mkdir
    #[arg(long)]
    pub no_implicit_output: bool,

    /// Container network (see docker run --help)
    #[arg(long)]
    pub network: Option<String>,

    /// User in container (see docker run --help)
    #[arg(long)]
    pub user: Option<String>,

    /// Add Linux capability, repeat as needed (see docker run --help)
    #[arg(long = "cap-add", value_name = "CAP")]
    pub cap_add: Vec<String>,

    /// Drop Linux capability, repeat as needed (see docker run --help)
    #[arg(long = "cap-drop", value_name = "CAP")]
    pub cap_drop: Vec<String>,

    /// Runtime to use with this container (see docker run --help)
    #[arg(long)]
    pub runtime: Option<String>,

    /// Keep STDIN open and forward it to the tool
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY
    #[arg(short, long)]
    pub tty: bool,

    /// Overwrite the default entrypoint of the image
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// The tool image and its arguments
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "TOOL"
    )]
    pub tool: Vec<String>,
}

impl RunArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            input_tar: self.input_tar.clone(),
            output_tar: self.output_tar.clone(),
            output_dirs: self.mkdir.clone(),
            input_filters: self.in_filter.clone(),
            output_filters: self.out_filter.clone(),
            no_defaults: self.no_defaults,
            implicit_output: !self.no_implicit_output,
            network: self.network.clone(),
            user: self.user.clone(),
            cap_add: self.cap_add.clone(),
            cap_drop: self.cap_drop.clone(),
            runtime: self.runtime.clone(),
            tty: self.tty,
            interactive: self.interactive,
            entrypoint: self.entrypoint.clone(),
            ..Default::default()
        }
    }

    fn open_tool(&self, global: &crate::cli::GlobalFlags) -> anyhow::Result<(ToolImage, &[String])> {
        let (image, args) = self
            .tool
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Missing tool name argument"))?;
        let options = self.run_options();
        options.validate()?;

        let runtime = global.create_runtime()?;
        let tool = ToolImage::in_current_dir(runtime, image)?.with_options(options);
        Ok((tool, args))
    }
}

/// `cincan run`: exit code is the tool's.
pub fn execute(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let (mut tool, tool_args) = args.open_tool(global)?;
    let log = tool.run(tool_args)?;
    finish(log, global)
}

/// `cincan test`: copy a file through the image and report the verdict.
pub fn check(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    let (mut tool, tool_args) = args.open_tool(global)?;
    info!(
        "# {} {}",
        tool.image().tags.join(","),
        cincan::util::short_id(&tool.image().id)
    );
    let log = ContainerCheck::new(&mut tool).run(tool_args)?;
    finish(log, global)
}

fn finish(log: CommandLog, global: &crate::cli::GlobalFlags) -> anyhow::Result<i32> {
    if log.exit_code == 0 && global.config()?.command_log {
        let writer = CommandLogWriter::new(global.log_store()?);
        writer.write(&log)?;
    }
    if let Some(stdout) = &log.stdout {
        let mut out = std::io::stdout().lock();
        out.write_all(stdout)?;
        out.flush()?;
    }
    if let Some(stderr) = &log.stderr {
        std::io::stderr().write_all(stderr)?;
    }
    Ok(i32::try_from(log.exit_code).unwrap_or(1))
}
