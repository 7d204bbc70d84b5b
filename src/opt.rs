use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error};
use clap::{ArgAction, Args, Parser, Subcommand};

use code_runner_exec::RunnerConfig;
use code_runner_lang::Language;

/// Version of the binaries, including the git revision when available.
pub const VERSION: &str = include_str!(concat!(env!("OUT_DIR"), "/version.txt"));

#[derive(Parser, Debug)]
#[command(name = "code-runner", version, long_version = VERSION)]
pub struct Opt {
    #[command(flatten)]
    pub logger: LoggerOpt,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a snippet of code inside the sandbox
    Run(RunOpt),
    /// Spawn an HTTP server executing the snippets it receives
    Serve(ServeOpt),
    /// List the known languages and their interpreters
    Languages(LanguagesOpt),
}

#[derive(Args, Debug, Clone)]
pub struct RunOpt {
    /// Language of the snippet (python, javascript, ...)
    #[arg(short, long)]
    pub language: Language,

    /// Text to send to the standard input of the snippet
    #[arg(long, conflicts_with = "stdin_file")]
    pub stdin: Option<String>,

    /// File to send to the standard input of the snippet
    #[arg(long)]
    pub stdin_file: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// File with the code to execute. If missing, or `-`, the code is read from standard input.
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub execution: ExecutionOpt,
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpt {
    /// Address to bind the server on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    #[command(flatten)]
    pub execution: ExecutionOpt,
}

#[derive(Args, Debug, Clone)]
pub struct LanguagesOpt {
    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub execution: ExecutionOpt,
}

#[derive(Args, Debug, Clone)]
pub struct LoggerOpt {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExecutionOpt {
    /// YAML file with the configuration of the executor. The other options override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Wall-clock time limit of each execution, in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// CPU time limit of each execution, in seconds
    #[arg(long)]
    pub cpu_time: Option<f64>,

    /// Memory limit of each execution, in KiB
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Maximum number of bytes kept of stdout and stderr
    #[arg(long)]
    pub output_limit: Option<u64>,

    /// Maximum number of executions running at the same time. Defaults to the number of CPUs.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Maximum number of executions waiting for a free slot
    #[arg(long)]
    pub max_queued: Option<usize>,

    /// Where to create the sandboxes
    #[arg(long)]
    pub sandboxes_dir: Option<PathBuf>,
}

impl ExecutionOpt {
    /// Make a `RunnerConfig` from the configuration file, if any, and the command line options.
    pub fn to_config(&self) -> Result<RunnerConfig, Error> {
        let mut config = match &self.config {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Cannot open config file {}", path.display()))?;
                serde_yaml::from_reader(file)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => RunnerConfig {
                sandboxes_dir: default_sandboxes_dir(),
                ..Default::default()
            },
        };
        if let Some(timeout) = self.timeout {
            config.limits.timeout = secs(timeout).context("Invalid --timeout")?;
        }
        if let Some(cpu_time) = self.cpu_time {
            config.limits.cpu_time = secs(cpu_time).context("Invalid --cpu-time")?;
        }
        if let Some(memory) = self.memory_limit {
            config.limits.memory = memory;
        }
        if let Some(output) = self.output_limit {
            config.limits.output = output;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        if let Some(max_queued) = self.max_queued {
            config.max_queued = max_queued;
        }
        if let Some(dir) = &self.sandboxes_dir {
            config.sandboxes_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

impl LoggerOpt {
    pub fn enable_log(&self) {
        if self.verbose > 0 {
            std::env::set_var("RUST_BACKTRACE", "1");
            match self.verbose {
                0 => unreachable!(),
                1 => std::env::set_var("RUST_LOG", "info,tabox=info"),
                2 => std::env::set_var("RUST_LOG", "debug,tabox=debug"),
                _ => std::env::set_var("RUST_LOG", "trace,tabox=trace"),
            }
        }

        env_logger::Builder::from_default_env()
            .format_timestamp_nanos()
            .init();
        better_panic::install();
    }
}

/// The directory for the sandboxes when nothing is specified: a cache directory if available,
/// otherwise a temporary directory.
fn default_sandboxes_dir() -> PathBuf {
    match directories::ProjectDirs::from("", "", "code-runner") {
        Some(project) => project.cache_dir().join("sandboxes"),
        None => std::env::temp_dir().join("code-runner").join("sandboxes"),
    }
}

fn secs(secs: f64) -> Result<Duration, Error> {
    Ok(Duration::try_from_secs_f64(secs)?)
}
