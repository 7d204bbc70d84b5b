use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use code_runner_lang::InterpreterConfiguration;

/// Default wall-clock timeout of an execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default memory ceiling, in KiB.
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024;
/// Default number of bytes of each output stream that are kept.
pub const DEFAULT_OUTPUT_LIMIT: u64 = 64 * 1024;
/// Minimum limit on the size of the files written inside the sandbox, so that the process cannot
/// fill the disk.
pub const FILE_SIZE_LIMIT: u64 = 64 * 1024 * 1024;
/// Default maximum number of executions waiting for a free slot.
pub const DEFAULT_MAX_QUEUED: usize = 64;

/// Errors in a `RunnerConfig`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A limit that must be positive is zero.
    #[error("The {0} limit must be greater than zero")]
    ZeroLimit(&'static str),
    /// No execution could ever run.
    #[error("At least one concurrent execution must be allowed")]
    NoConcurrency,
    /// The memory limit cannot be expressed in bytes.
    #[error("The memory limit of {0} KiB is too large")]
    MemoryTooLarge(u64),
}

/// The limits applied to every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionLimits {
    /// Wall-clock time after which the execution is killed.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Maximum CPU time (user + system) of the process.
    #[serde(with = "duration_secs")]
    pub cpu_time: Duration,
    /// Maximum memory of the process, in KiB.
    pub memory: u64,
    /// Maximum number of bytes kept for each of stdout and stderr.
    pub output: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            timeout: DEFAULT_TIMEOUT,
            cpu_time: DEFAULT_TIMEOUT,
            memory: DEFAULT_MEMORY_LIMIT,
            output: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl ExecutionLimits {
    /// Maximum size of a file written inside the sandbox. It is never less than the kept output
    /// plus one byte, which the helper writes to detect a truncated stream.
    pub fn file_size(&self) -> u64 {
        self.output.saturating_add(1).max(FILE_SIZE_LIMIT)
    }
}

/// The configuration of a [`CodeExecutor`](struct.CodeExecutor.html).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// The limits of each execution.
    pub limits: ExecutionLimits,
    /// Maximum number of executions running at the same time.
    pub max_concurrent: usize,
    /// Maximum number of executions waiting for a free slot, the others are rejected.
    pub max_queued: usize,
    /// Where to create the sandbox directories.
    pub sandboxes_dir: PathBuf,
    /// User id of the process inside the sandbox.
    pub uid: u32,
    /// Group id of the process inside the sandbox.
    pub gid: u32,
    /// Extra directories the sandboxed process can read, for example a non-standard interpreter
    /// installation.
    pub extra_readable_dirs: Vec<PathBuf>,
    /// Extra environment variables for the sandboxed process.
    pub env: BTreeMap<String, String>,
    /// Python interpreter to use, instead of the default one.
    pub python: Option<PathBuf>,
    /// Node.js interpreter to use, instead of the default one.
    pub node: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            limits: ExecutionLimits::default(),
            max_concurrent: num_cpus::get(),
            max_queued: DEFAULT_MAX_QUEUED,
            sandboxes_dir: std::env::temp_dir().join("code-runner").join("sandboxes"),
            uid: 1000,
            gid: 1000,
            extra_readable_dirs: vec![],
            env: BTreeMap::new(),
            python: None,
            node: None,
        }
    }
}

impl RunnerConfig {
    /// Check that the configuration can actually run something.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.timeout.is_zero() {
            return Err(ConfigError::ZeroLimit("timeout"));
        }
        if self.limits.cpu_time.is_zero() {
            return Err(ConfigError::ZeroLimit("CPU time"));
        }
        if self.limits.memory == 0 {
            return Err(ConfigError::ZeroLimit("memory"));
        }
        if self.limits.memory.checked_mul(1024).is_none() {
            return Err(ConfigError::MemoryTooLarge(self.limits.memory));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        Ok(())
    }

    /// The interpreters to use: the ones from the environment, overridden by this configuration.
    pub fn interpreters(&self) -> InterpreterConfiguration {
        let mut interpreters = InterpreterConfiguration::from_env();
        if let Some(python) = &self.python {
            interpreters.python = python.clone();
        }
        if let Some(node) = &self.node {
            interpreters.node = node.clone();
        }
        interpreters
    }
}

/// (De)serialize a `Duration` as a floating point number of seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        let config = RunnerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.limits.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_limits() {
        let mut config = RunnerConfig::default();
        config.limits.timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroLimit("timeout")));

        let mut config = RunnerConfig::default();
        config.max_concurrent = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoConcurrency));
    }

    #[test]
    fn test_memory_too_large() {
        let mut config = RunnerConfig::default();
        config.limits.memory = 1 << 54;
        assert_eq!(config.validate(), Err(ConfigError::MemoryTooLarge(1 << 54)));
        config.limits.memory = (1 << 54) - 1;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_file_size_guard() {
        let mut limits = ExecutionLimits::default();
        assert_eq!(limits.file_size(), FILE_SIZE_LIMIT);
        limits.output = FILE_SIZE_LIMIT * 2;
        assert_eq!(limits.file_size(), FILE_SIZE_LIMIT * 2 + 1);
        limits.output = u64::MAX;
        assert_eq!(limits.file_size(), u64::MAX);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"limits": {"timeout": 2.5}, "max_queued": 3}"#).unwrap();
        assert_eq!(config.limits.timeout, Duration::from_millis(2500));
        assert_eq!(config.limits.memory, DEFAULT_MEMORY_LIMIT);
        assert_eq!(config.max_queued, 3);
    }

    #[test]
    fn test_negative_duration() {
        let config = serde_json::from_str::<RunnerConfig>(r#"{"limits": {"timeout": -1}}"#);
        assert!(config.is_err());
    }

    #[test]
    fn test_unknown_field() {
        let config = serde_json::from_str::<RunnerConfig>(r#"{"timeout": 1}"#);
        assert!(config.is_err());
    }

    #[test]
    fn test_interpreter_overrides() {
        let config = RunnerConfig {
            python: Some("/usr/bin/python3.11".into()),
            ..Default::default()
        };
        assert_eq!(
            config.interpreters().python,
            PathBuf::from("/usr/bin/python3.11")
        );
    }
}
