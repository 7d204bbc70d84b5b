use std::time::Duration;

use serde::{Deserialize, Serialize};

use code_runner_lang::Language;

/// Message of a timed out execution.
pub const TIMEOUT_MESSAGE: &str = "Execution timeout";
/// Message of a cancelled execution.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled";
/// Message of an execution rejected because too many are already waiting.
pub const REJECTED_MESSAGE: &str = "Too many executions in progress, retry later";
/// Message of an execution without code.
pub const EMPTY_CODE_MESSAGE: &str = "No code to execute";
/// Marker appended to an output stream that has been cut.
pub const TRUNCATED_MARKER: &str = "\n[output truncated]";

/// A request to execute a snippet of code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The program text.
    pub code: String,
    /// The language the program is written in.
    pub language: Language,
    /// Text to send to the standard input of the program.
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    /// Make a new request without standard input.
    pub fn new<S: Into<String>>(code: S, language: Language) -> ExecutionRequest {
        ExecutionRequest {
            code: code.into(),
            language,
            stdin: None,
        }
    }

    /// Set the standard input of the program.
    pub fn stdin<S: Into<String>>(mut self, stdin: S) -> ExecutionRequest {
        self.stdin = Some(stdin.into());
        self
    }
}

/// How the execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The program exited with status 0 within the limits.
    Success,
    /// The program exited with a non-zero status code, which is attached.
    ReturnCode(i32),
    /// The program stopped due to a signal, the number and the name of the signal are attached.
    Signal(u32, String),
    /// The program used more CPU time than allowed.
    CpuTimeLimitExceeded,
    /// The program used more memory than allowed.
    MemoryLimitExceeded,
    /// The program hasn't exited within the wall time limit.
    Timeout,
    /// The caller cancelled the execution.
    Cancelled,
    /// The language cannot be executed, nothing has been run.
    UnsupportedLanguage(Language),
    /// The request is not valid, nothing has been run.
    InvalidRequest(String),
    /// Too many executions are waiting, nothing has been run.
    Rejected,
    /// The program could not be started, the error message is attached.
    LaunchFailure(String),
}

impl ExecutionStatus {
    /// Whether the program ran to completion with exit status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    /// The exit code reported for this status.
    ///
    /// Signals follow the shell convention of `128 + signal`, the failures that are not caused by
    /// the program itself are `-1`, the invalid requests are `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionStatus::Success => 0,
            ExecutionStatus::ReturnCode(code) => *code,
            ExecutionStatus::Signal(signal, _) => 128 + *signal as i32,
            ExecutionStatus::UnsupportedLanguage(_) | ExecutionStatus::InvalidRequest(_) => 1,
            ExecutionStatus::CpuTimeLimitExceeded
            | ExecutionStatus::MemoryLimitExceeded
            | ExecutionStatus::Timeout
            | ExecutionStatus::Cancelled
            | ExecutionStatus::Rejected
            | ExecutionStatus::LaunchFailure(_) => -1,
        }
    }

    /// A message explaining why the program stopped, `None` if the program just exited.
    pub fn message(&self) -> Option<String> {
        match self {
            ExecutionStatus::Success | ExecutionStatus::ReturnCode(_) => None,
            ExecutionStatus::Signal(_, name) => Some(format!("Killed by signal {name}")),
            ExecutionStatus::CpuTimeLimitExceeded => Some("CPU time limit exceeded".into()),
            ExecutionStatus::MemoryLimitExceeded => Some("Memory limit exceeded".into()),
            ExecutionStatus::Timeout => Some(TIMEOUT_MESSAGE.into()),
            ExecutionStatus::Cancelled => Some(CANCELLED_MESSAGE.into()),
            ExecutionStatus::UnsupportedLanguage(lang) => {
                Some(format!("Language {lang} not supported"))
            }
            ExecutionStatus::InvalidRequest(message) => Some(message.clone()),
            ExecutionStatus::Rejected => Some(REJECTED_MESSAGE.into()),
            ExecutionStatus::LaunchFailure(message) => Some(message.clone()),
        }
    }
}

/// Resources used during the execution, as measured by the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesUsage {
    /// Number of seconds the process used in user space.
    pub cpu_time: f64,
    /// Number of seconds the process used in kernel space.
    pub sys_time: f64,
    /// Number of seconds from the start to the end of the process.
    pub wall_time: f64,
    /// Number of KiB used _at most_ by the process.
    pub memory: u64,
}

/// The outcome of an execution. Every failure is reported here, an execution never fails with an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the program exited with status 0 within the limits.
    pub success: bool,
    /// The captured standard output.
    pub stdout: String,
    /// The captured standard error, followed by the failure message, if any.
    pub stderr: String,
    /// `stdout` followed by `stderr`.
    pub combined_output: String,
    /// The exit code of the program, see [`ExecutionStatus::exit_code`].
    pub exit_code: i32,
    /// Wall-clock seconds spent running the program.
    pub elapsed_seconds: f64,
    /// How the execution ended.
    pub status: ExecutionStatus,
    /// Whether some output has been cut.
    pub truncated: bool,
    /// Resources used by the program, `None` if the program has not run to completion.
    pub resources: Option<ResourcesUsage>,
}

impl ExecutionResult {
    /// A result where nothing useful was produced, only a message.
    fn failure(status: ExecutionStatus, elapsed: Duration) -> ExecutionResult {
        let message = status.message().unwrap_or_default();
        ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr: message.clone(),
            combined_output: message,
            exit_code: status.exit_code(),
            elapsed_seconds: elapsed.as_secs_f64(),
            status,
            truncated: false,
            resources: None,
        }
    }

    /// The language cannot be executed.
    pub fn unsupported_language(language: Language) -> ExecutionResult {
        Self::failure(ExecutionStatus::UnsupportedLanguage(language), Duration::ZERO)
    }

    /// The request cannot be executed.
    pub fn invalid_request<S: Into<String>>(message: S) -> ExecutionResult {
        Self::failure(ExecutionStatus::InvalidRequest(message.into()), Duration::ZERO)
    }

    /// The execution did not complete within `timeout`.
    pub fn timeout(timeout: Duration) -> ExecutionResult {
        Self::failure(ExecutionStatus::Timeout, timeout)
    }

    /// The execution has been cancelled after `elapsed`.
    pub fn cancelled(elapsed: Duration) -> ExecutionResult {
        Self::failure(ExecutionStatus::Cancelled, elapsed)
    }

    /// The execution has not been admitted.
    pub fn rejected() -> ExecutionResult {
        Self::failure(ExecutionStatus::Rejected, Duration::ZERO)
    }

    /// The program could not be started.
    pub fn launch_failure<S: Into<String>>(error: S) -> ExecutionResult {
        Self::failure(ExecutionStatus::LaunchFailure(error.into()), Duration::ZERO)
    }

    /// The program ran, with the specified outcome.
    pub fn completed(
        status: ExecutionStatus,
        stdout: CapturedOutput,
        stderr: CapturedOutput,
        elapsed: Duration,
        resources: ResourcesUsage,
    ) -> ExecutionResult {
        let truncated = stdout.truncated || stderr.truncated;
        let stdout = stdout.into_text();
        let mut stderr = stderr.into_text();
        if let Some(message) = status.message() {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&message);
        }
        ExecutionResult {
            success: status.is_success(),
            combined_output: format!("{stdout}{stderr}"),
            stdout,
            stderr,
            exit_code: status.exit_code(),
            elapsed_seconds: elapsed.as_secs_f64(),
            status,
            truncated,
            resources: Some(resources),
        }
    }
}

/// An output stream read back from the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// The kept bytes.
    pub content: Vec<u8>,
    /// Whether the stream was longer than the kept bytes.
    pub truncated: bool,
}

impl CapturedOutput {
    /// The text of the stream, with invalid UTF-8 replaced and the truncation marker appended.
    pub fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.content).into_owned();
        if self.truncated {
            text.push_str(TRUNCATED_MARKER);
        }
        text
    }
}
