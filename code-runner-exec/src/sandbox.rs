//! Preparation of the sandbox directories, and the jobs run inside them.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use tabox::configuration::SandboxConfiguration;
use tabox::result::{ExitStatus, SandboxExecutionResult};
use tabox::syscall_filter::SyscallFilter;
use tempfile::TempDir;

use code_runner_lang::InterpreterDescriptor;

use crate::result::{CapturedOutput, ExecutionStatus, ResourcesUsage};
use crate::{ExecutionLimits, RunnerConfig};

/// The list of all the system-wide readable directories inside the sandbox.
pub const READABLE_DIRS: &[&str] = &[
    "/lib",
    "/lib32",
    "/lib64",
    "/usr",
    "/bin",
    "/opt",
    // update-alternatives stuff, sometimes the executables are symlinked here
    "/etc/alternatives/",
    "/var/lib/dpkg/alternatives/",
];

/// The `$PATH` of the sandboxed process.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Where the box directory is mounted inside the sandbox.
pub const BOX_ROOT: &str = "/box";

/// Response of the internal implementation of the sandbox.
#[derive(Debug, Serialize, Deserialize)]
pub enum RawSandboxResult {
    /// The sandbox has been executed successfully.
    Success(SandboxExecutionResult),
    /// There was an error executing the sandbox.
    Error(String),
}

/// Everything needed to spawn one sandboxed process. This is what is sent to the sandbox helper
/// process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxJob {
    /// Absolute path of the executable.
    pub executable: PathBuf,
    /// Command line arguments, without the executable.
    pub args: Vec<String>,
    /// The whole environment of the process.
    pub env: Vec<(String, String)>,
    /// Directory on the host mounted as the writable working directory.
    pub box_dir: PathBuf,
    /// Directory on the host mounted as `/etc`.
    pub etc_dir: PathBuf,
    /// File on the host to use as stdin, inherited if not set.
    pub stdin: Option<PathBuf>,
    /// File on the host where the stdout is written, inherited if not set.
    pub stdout: Option<PathBuf>,
    /// File on the host where the stderr is written, inherited if not set.
    pub stderr: Option<PathBuf>,
    /// Directories mounted read-only at the same path.
    pub readable_dirs: Vec<PathBuf>,
    /// CPU time limit, in seconds.
    pub cpu_time: Option<u64>,
    /// Wall time limit, in seconds.
    pub wall_time: Option<u64>,
    /// Address space limit, in bytes.
    pub memory: Option<u64>,
    /// Maximum size of the files written by the process, in bytes.
    pub file_size: Option<u64>,
    /// If set, stdout and stderr are read through a pipe by the helper, and only this many bytes
    /// (plus one, to detect the truncation) are written to their files. The rest is discarded.
    #[serde(default)]
    pub output_limit: Option<u64>,
    /// Whether the process may spawn threads and processes.
    pub multiprocess: bool,
    /// User id inside the sandbox.
    pub uid: u32,
    /// Group id inside the sandbox.
    pub gid: u32,
}

impl SandboxJob {
    /// Build the `tabox` configuration of this job.
    pub fn configuration(&self) -> SandboxConfiguration {
        let mut config = SandboxConfiguration::default();
        config.working_directory(BOX_ROOT);
        config.mount(&self.box_dir, BOX_ROOT, true);
        // has to be writable for mounting stuff in it
        config.mount(&self.etc_dir, "/etc", true);
        for dir in &self.readable_dirs {
            config.mount(dir, dir, false);
        }
        config.mount_tmpfs(true);
        if self.multiprocess {
            config.mount_proc(true);
        }
        for (key, value) in &self.env {
            config.env(key, value);
        }
        if let Some(stdin) = &self.stdin {
            config.stdin(stdin);
        }
        if let Some(stdout) = &self.stdout {
            config.stdout(stdout);
        }
        if let Some(stderr) = &self.stderr {
            config.stderr(stderr);
        }
        if let Some(cpu) = self.cpu_time {
            config.time_limit(cpu);
        }
        if let Some(wall) = self.wall_time {
            config.wall_time_limit(wall);
        }
        if let Some(memory) = self.memory {
            config.memory_limit(memory);
        }
        config.syscall_filter(SyscallFilter::build(self.multiprocess, true));
        config.executable(&self.executable);
        for arg in &self.args {
            config.arg(arg);
        }
        // drop root privileges in the sandbox
        config.uid(self.uid as usize);
        config.gid(self.gid as usize);
        config
    }
}

/// A sandbox directory prepared for one execution. The directory is deleted on drop.
///
/// Layout of the directory:
/// - `box/` the working directory of the process, empty
/// - `etc/` with a minimal `passwd` and `group`
/// - `stdin`, `stdout`, `stderr`
#[derive(Debug)]
pub struct Sandbox {
    /// Handle to the temporary directory.
    dir: TempDir,
    /// The job to run in this sandbox.
    job: SandboxJob,
}

impl Sandbox {
    /// Prepare a new sandbox for running `code` with the interpreter, feeding it `stdin`.
    pub fn new(
        config: &RunnerConfig,
        descriptor: &InterpreterDescriptor,
        code: &str,
        stdin: Option<&str>,
    ) -> Result<Sandbox, Error> {
        let executable = descriptor.resolve_binary().map_err(|_| {
            anyhow::anyhow!(
                "Executable {:?} not found",
                descriptor.binary.to_string_lossy()
            )
        })?;
        std::fs::create_dir_all(&config.sandboxes_dir).with_context(|| {
            format!(
                "Failed to create sandboxes directory {}",
                config.sandboxes_dir.display()
            )
        })?;
        let dir = tempfile::Builder::new()
            .prefix("box")
            .tempdir_in(&config.sandboxes_dir)
            .context("Failed to create sandbox directory")?;
        let path = dir.path();
        trace!("Setting up sandbox at {:?}", path);

        let box_dir = path.join("box");
        std::fs::create_dir(&box_dir)?;
        set_permissions(&box_dir, 0o700)?;

        let etc_dir = path.join("etc");
        write_etc(&etc_dir, config.uid, config.gid)?;

        let stdin_path = match stdin {
            Some(stdin) => {
                let stdin_path = path.join("stdin");
                std::fs::write(&stdin_path, stdin)?;
                set_permissions(&stdin_path, 0o400)?;
                stdin_path
            }
            None => PathBuf::from("/dev/null"),
        };
        let stdout = path.join("stdout");
        let stderr = path.join("stderr");
        touch_file(&stdout, 0o600)?;
        touch_file(&stderr, 0o600)?;

        let limits = &config.limits;
        let mut env = vec![
            ("PATH".to_string(), SANDBOX_PATH.to_string()),
            ("HOME".to_string(), BOX_ROOT.to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
        ];
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut readable_dirs: Vec<PathBuf> = READABLE_DIRS
            .iter()
            .map(PathBuf::from)
            .chain(config.extra_readable_dirs.iter().cloned())
            .filter(|dir| dir.is_dir())
            .collect();
        readable_dirs.dedup();

        let job = SandboxJob {
            executable,
            args: descriptor.args(code, Some(limits.memory)),
            env,
            box_dir,
            etc_dir,
            stdin: Some(stdin_path),
            stdout: Some(stdout),
            stderr: Some(stderr),
            readable_dirs,
            cpu_time: Some(ceil_secs(limits.cpu_time.as_secs_f64())),
            // the executor kills the sandbox at the timeout, this is only a safety net
            wall_time: Some(ceil_secs(limits.timeout.as_secs_f64()) + 1),
            memory: descriptor
                .address_space_limit()
                .then_some(limits.memory * 1024),
            file_size: Some(limits.file_size()),
            output_limit: Some(limits.output),
            multiprocess: descriptor.multiprocess,
            uid: config.uid,
            gid: config.gid,
        };
        trace!("Sandbox at {:?} ready!", path);
        Ok(Sandbox { dir, job })
    }

    /// The job to run in this sandbox.
    pub fn job(&self) -> &SandboxJob {
        &self.job
    }

    /// The path of the sandbox directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Read back the standard output, keeping at most `limit` bytes.
    pub fn stdout(&self, limit: u64) -> Result<CapturedOutput, Error> {
        read_output(&self.path().join("stdout"), limit)
    }

    /// Read back the standard error, keeping at most `limit` bytes.
    pub fn stderr(&self, limit: u64) -> Result<CapturedOutput, Error> {
        read_output(&self.path().join("stderr"), limit)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // the process may have removed the write bit, the directory cannot be removed without it
        if set_permissions(&self.job.box_dir, 0o700).is_err() {
            warn!("Cannot 'chmod 700' the sandbox directory");
        }
    }
}

/// Create the directory mounted as `/etc` inside the sandbox, with the users some interpreters
/// expect to find.
pub fn write_etc(etc_dir: &Path, uid: u32, gid: u32) -> Result<(), Error> {
    std::fs::create_dir_all(etc_dir)
        .with_context(|| format!("Failed to create {}", etc_dir.display()))?;
    std::fs::write(
        etc_dir.join("passwd"),
        format!(
            "root::0:0::/:/bin/sh\n\
             nobody::{uid}:{gid}::{BOX_ROOT}:/bin/sh\n"
        ),
    )
    .with_context(|| format!("Failed to write /etc/passwd in {}", etc_dir.display()))?;
    std::fs::write(
        etc_dir.join("group"),
        format!(
            "root:x:0:root\n\
             nobody:x:{gid}:nobody\n"
        ),
    )
    .with_context(|| format!("Failed to write /etc/group in {}", etc_dir.display()))?;
    Ok(())
}

/// Read at most `limit` bytes of the file, reporting whether there was more.
pub fn read_output(path: &Path, limit: u64) -> Result<CapturedOutput, Error> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut content = vec![];
    file.take(limit.saturating_add(1))
        .read_to_end(&mut content)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let truncated = content.len() as u64 > limit;
    if truncated {
        content.truncate(limit as usize);
    }
    Ok(CapturedOutput { content, truncated })
}

/// Classify the outcome of the sandbox and extract the resources it used.
pub fn status_and_resources(
    sandbox_status: &SandboxExecutionResult,
    limits: &ExecutionLimits,
) -> (ExecutionStatus, ResourcesUsage) {
    let resources = ResourcesUsage {
        cpu_time: sandbox_status.resource_usage.user_cpu_time,
        sys_time: sandbox_status.resource_usage.system_cpu_time,
        wall_time: sandbox_status.resource_usage.wall_time_usage,
        memory: sandbox_status.resource_usage.memory_usage / 1024,
    };

    // it's important to check those before the signals because exceeding those
    // limits may trigger a SIGKILL from the sandbox
    if resources.cpu_time + resources.sys_time > limits.cpu_time.as_secs_f64() {
        return (ExecutionStatus::CpuTimeLimitExceeded, resources);
    }
    if resources.wall_time > limits.timeout.as_secs_f64() {
        return (ExecutionStatus::Timeout, resources);
    }
    if resources.memory > limits.memory {
        return (ExecutionStatus::MemoryLimitExceeded, resources);
    }
    match sandbox_status.status {
        ExitStatus::Signal(signal) => (
            ExecutionStatus::Signal(
                signal as u32,
                sandbox_status
                    .status
                    .signal_name()
                    .unwrap_or_else(|| "unknown signal".into()),
            ),
            resources,
        ),
        ExitStatus::ExitCode(0) => (ExecutionStatus::Success, resources),
        ExitStatus::Killed => (ExecutionStatus::Timeout, resources),
        ExitStatus::ExitCode(code) => (ExecutionStatus::ReturnCode(code as i32), resources),
    }
}

/// Round up a number of seconds, the sandbox only accepts whole seconds.
fn ceil_secs(secs: f64) -> u64 {
    secs.ceil().max(1.0) as u64
}

/// Create an empty file inside the sandbox and chmod-it.
fn touch_file(dest: &Path, mode: u32) -> Result<(), Error> {
    File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    set_permissions(dest, mode)
}

fn set_permissions(dest: &Path, mode: u32) -> Result<(), Error> {
    let mut permissions = std::fs::metadata(dest)?.permissions();
    permissions.set_mode(mode);
    std::fs::set_permissions(dest, permissions)
        .with_context(|| format!("Failed to chmod {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_runner_lang::{InterpreterConfiguration, Language};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tabox::result::ResourceUsage;

    fn fake_descriptor(language: Language) -> InterpreterDescriptor {
        let mut desc =
            InterpreterDescriptor::for_language(language, &InterpreterConfiguration::default())
                .unwrap();
        // always present, the sandbox is not started in these tests
        desc.binary = "sh".into();
        desc
    }

    fn config(dir: &Path) -> RunnerConfig {
        RunnerConfig {
            sandboxes_dir: dir.to_owned(),
            ..Default::default()
        }
    }

    fn result(status: ExitStatus, cpu: f64, wall: f64, memory: u64) -> SandboxExecutionResult {
        SandboxExecutionResult {
            status,
            resource_usage: ResourceUsage {
                memory_usage: memory,
                user_cpu_time: cpu,
                system_cpu_time: 0.0,
                wall_time_usage: wall,
            },
        }
    }

    #[test]
    fn test_sandbox_layout() {
        let tmpdir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(
            &config(tmpdir.path()),
            &fake_descriptor(Language::Python),
            "print(1)",
            Some("hello"),
        )
        .unwrap();
        let job = sandbox.job();
        assert_eq!(std::fs::read_to_string(job.stdin.as_ref().unwrap()).unwrap(), "hello");
        assert!(job.stdout.as_ref().unwrap().is_file());
        assert!(job.stderr.as_ref().unwrap().is_file());
        assert!(job.box_dir.is_dir());
        assert_eq!(std::fs::read_dir(&job.box_dir).unwrap().count(), 0);
        let passwd = std::fs::read_to_string(job.etc_dir.join("passwd")).unwrap();
        assert!(passwd.contains("nobody::1000:1000"));
        assert_eq!(job.args.last().unwrap(), "print(1)");
        assert!(job.executable.is_absolute());
    }

    #[test]
    fn test_sandbox_limits() {
        let tmpdir = TempDir::new().unwrap();
        let mut config = config(tmpdir.path());
        config.limits.timeout = Duration::from_millis(1500);
        config.limits.cpu_time = Duration::from_secs(3);
        let sandbox =
            Sandbox::new(&config, &fake_descriptor(Language::Python), "1", None).unwrap();
        let job = sandbox.job();
        assert_eq!(job.stdin, Some(PathBuf::from("/dev/null")));
        assert_eq!(job.cpu_time, Some(3));
        assert_eq!(job.wall_time, Some(3));
        assert_eq!(job.memory, Some(config.limits.memory * 1024));
        assert_eq!(job.output_limit, Some(config.limits.output));
        // a guard for the disk, the output is cut by the helper
        assert_eq!(job.file_size, Some(crate::FILE_SIZE_LIMIT));
        assert!(!job.multiprocess);
    }

    #[test]
    fn test_sandbox_configuration_drops_privileges() {
        let tmpdir = TempDir::new().unwrap();
        let config = config(tmpdir.path());
        let sandbox =
            Sandbox::new(&config, &fake_descriptor(Language::Python), "1", None).unwrap();
        let tabox = sandbox.job().configuration();
        assert_eq!(tabox.uid, 1000);
        assert_eq!(tabox.gid, 1000);
        assert_eq!(tabox.working_directory, PathBuf::from("/box"));
    }

    #[test]
    fn test_sandbox_env_is_not_inherited() {
        std::env::set_var("CODE_RUNNER_TEST_SECRET", "hunter2");
        let tmpdir = TempDir::new().unwrap();
        let mut config = config(tmpdir.path());
        config.env.insert("FOO".into(), "bar".into());
        let sandbox =
            Sandbox::new(&config, &fake_descriptor(Language::Python), "1", None).unwrap();
        let env = &sandbox.job().env;
        assert!(env.iter().all(|(k, _)| k != "CODE_RUNNER_TEST_SECRET"));
        assert!(env.contains(&("FOO".to_string(), "bar".to_string())));
        assert!(env.contains(&("PATH".to_string(), SANDBOX_PATH.to_string())));
    }

    #[test]
    fn test_sandbox_node_heap_limit() {
        let tmpdir = TempDir::new().unwrap();
        let config = config(tmpdir.path());
        let sandbox =
            Sandbox::new(&config, &fake_descriptor(Language::JavaScript), "1", None).unwrap();
        let job = sandbox.job();
        assert_eq!(job.memory, None);
        assert!(job.multiprocess);
        assert_eq!(job.args[0], "--max-old-space-size=256");
    }

    #[test]
    fn test_sandbox_missing_interpreter() {
        let tmpdir = TempDir::new().unwrap();
        let mut desc = fake_descriptor(Language::Python);
        desc.binary = "not-an-interpreter-for-sure".into();
        let err = Sandbox::new(&config(tmpdir.path()), &desc, "1", None).unwrap_err();
        assert!(err.to_string().contains("not-an-interpreter-for-sure"));
        assert_eq!(std::fs::read_dir(tmpdir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_sandbox_on_drop() {
        let tmpdir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(
            &config(tmpdir.path()),
            &fake_descriptor(Language::Python),
            "1",
            Some("x"),
        )
        .unwrap();
        let path = sandbox.path().to_owned();
        set_permissions(&sandbox.job().box_dir, 0o500).unwrap();
        drop(sandbox);
        assert!(!path.exists());
    }

    #[test]
    fn test_read_output_truncated() {
        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("out");
        std::fs::write(&path, "0123456789").unwrap();
        let out = read_output(&path, 4).unwrap();
        assert_eq!(out.content, b"0123");
        assert!(out.truncated);
        let out = read_output(&path, 10).unwrap();
        assert_eq!(out.content, b"0123456789");
        assert!(!out.truncated);
    }

    #[test]
    fn test_status_success() {
        let limits = ExecutionLimits::default();
        let (status, res) =
            status_and_resources(&result(ExitStatus::ExitCode(0), 0.5, 0.7, 2048), &limits);
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(res.memory, 2);
        assert_eq!(res.cpu_time, 0.5);
    }

    #[test]
    fn test_status_return_code() {
        let limits = ExecutionLimits::default();
        let (status, _) =
            status_and_resources(&result(ExitStatus::ExitCode(2), 0.1, 0.1, 0), &limits);
        assert_eq!(status, ExecutionStatus::ReturnCode(2));
    }

    #[test]
    fn test_status_cpu_time() {
        let limits = ExecutionLimits::default();
        let (status, _) =
            status_and_resources(&result(ExitStatus::Signal(9), 10.5, 10.6, 0), &limits);
        assert_eq!(status, ExecutionStatus::CpuTimeLimitExceeded);
    }

    #[test]
    fn test_status_memory() {
        let limits = ExecutionLimits::default();
        let memory = (limits.memory + 1) * 1024;
        let (status, _) =
            status_and_resources(&result(ExitStatus::ExitCode(1), 0.1, 0.1, memory), &limits);
        assert_eq!(status, ExecutionStatus::MemoryLimitExceeded);
    }

    #[test]
    fn test_status_killed() {
        let limits = ExecutionLimits::default();
        let (status, _) = status_and_resources(&result(ExitStatus::Killed, 0.1, 1.0, 0), &limits);
        assert_eq!(status, ExecutionStatus::Timeout);
    }
}
