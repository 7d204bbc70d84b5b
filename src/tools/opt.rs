use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::opt::{LoggerOpt, VERSION};

#[derive(Parser, Debug)]
#[command(name = "code-runner-tools", version, long_version = VERSION)]
pub struct Opt {
    #[command(flatten)]
    pub logger: LoggerOpt,

    /// Which tool to use
    #[command(subcommand)]
    pub tool: Tool,
}

#[derive(Subcommand, Debug)]
pub enum Tool {
    /// Run a command inside a sandbox similar to the one used by code-runner
    Sandbox(SandboxOpt),
    /// Run the sandbox helper of code-runner.
    ///
    /// This option is left as undocumented as it's not part of the public API.
    #[command(hide = true)]
    InternalSandbox,
}

#[derive(Args, Debug, Clone)]
pub struct SandboxOpt {
    /// Working directory of the sandbox.
    ///
    /// Will be mounted in /box inside the sandbox. Defaults to current working directory.
    #[arg(long, short)]
    pub workdir: Option<PathBuf>,

    /// Memory limit for the sandbox, in KiB.
    #[arg(long, short)]
    pub memory_limit: Option<u64>,

    /// CPU time limit for the sandbox, in seconds.
    #[arg(long)]
    pub time_limit: Option<u64>,

    /// Wall time limit for the sandbox, in seconds.
    #[arg(long)]
    pub wall_time_limit: Option<u64>,

    /// Prevent forking.
    #[arg(long)]
    pub single_process: bool,

    /// List of additional directory mounted read-only inside the sandbox.
    #[arg(long, short)]
    pub readable_dirs: Vec<PathBuf>,

    /// User id.
    #[arg(long, default_value = "1000")]
    pub uid: u32,

    /// Group id.
    #[arg(long, default_value = "1000")]
    pub gid: u32,

    /// Command to execute inside the sandbox. If not specified, sh is executed.
    #[arg(last = true)]
    pub command: Vec<String>,
}
