use std::fs::{File, OpenOptions};
use std::io::{stdin, stdout, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, bail, Context, Error};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tabox::configuration::SandboxConfiguration;
use tabox::result::SandboxExecutionResult;
use tabox::{Sandbox, SandboxImplementation};

use code_runner_exec::find_tools::find_tools_path;
use code_runner_exec::{
    kill_process_group, publish_pid, RawSandboxResult, SandboxJob, SandboxRunner,
};

/// Environment variables passed from the service to the sandbox helper. The sandboxed process
/// itself gets only the environment written in the job.
const HELPER_ENV: &[&str] = &["PATH", "RUST_LOG"];

/// Actually parse the input and return the result.
fn run_sandbox() -> Result<SandboxExecutionResult, Error> {
    let job: SandboxJob =
        serde_json::from_reader(stdin()).context("Cannot read the job from stdin")?;
    if let Some(file_size) = job.file_size {
        // inherited by the sandboxed process, so it cannot fill the disk
        rlimit::setrlimit(rlimit::Resource::FSIZE, file_size, file_size)
            .context("Failed to limit the file size")?;
    }
    let mut config = job.configuration();
    let capture = match job.output_limit {
        Some(limit) => Some(OutputCapture::start(&job, limit, &mut config)?),
        None => None,
    };
    trace!("Sandbox configuration: {:#?}", config);
    let sandbox = SandboxImplementation::run(config)
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to create sandbox")?;
    let res = sandbox
        .wait()
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to wait sandbox")?;
    if let Some(capture) = capture {
        capture.finish()?;
    }
    Ok(res)
}

/// The standard output and error of the sandboxed process, read through FIFOs. Only the first
/// bytes are written to the files of the job, the rest is read and discarded: the process never
/// sees an error for writing too much.
struct OutputCapture {
    /// Write ends of the FIFOs, open until the sandbox exits so that the readers don't see the
    /// end of the stream before the process opens it.
    writers: Vec<File>,
    /// The threads copying the FIFOs to the files.
    readers: Vec<JoinHandle<Result<(), Error>>>,
}

impl OutputCapture {
    /// Redirect stdout and stderr of `config` to new FIFOs, next to the files of the job.
    fn start(
        job: &SandboxJob,
        limit: u64,
        config: &mut SandboxConfiguration,
    ) -> Result<OutputCapture, Error> {
        let mut capture = OutputCapture {
            writers: vec![],
            readers: vec![],
        };
        if let Some(stdout) = &job.stdout {
            config.stdout(capture.pipe(stdout, limit)?);
        }
        if let Some(stderr) = &job.stderr {
            config.stderr(capture.pipe(stderr, limit)?);
        }
        Ok(capture)
    }

    /// Make a FIFO whose content is copied to `dest`, returns its path.
    fn pipe(&mut self, dest: &Path, limit: u64) -> Result<PathBuf, Error> {
        let fifo = dest.with_extension("fifo");
        mkfifo(&fifo, Mode::S_IRUSR | Mode::S_IWUSR)
            .with_context(|| format!("Failed to create FIFO at {}", fifo.display()))?;
        // opening a FIFO in read-write mode does not wait for the other end
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&fifo)
            .with_context(|| format!("Failed to open FIFO at {}", fifo.display()))?;
        let reader = File::open(&fifo)
            .with_context(|| format!("Failed to open FIFO at {}", fifo.display()))?;
        let dest = dest.to_owned();
        let handle = std::thread::Builder::new()
            .name("Output reader".into())
            .spawn(move || drain(reader, &dest, limit))
            .context("Failed to spawn the output reader")?;
        self.writers.push(writer);
        self.readers.push(handle);
        Ok(fifo)
    }

    /// Wait for the readers, after the sandbox has exited.
    fn finish(self) -> Result<(), Error> {
        drop(self.writers);
        for reader in self.readers {
            reader
                .join()
                .map_err(|e| anyhow!("Output reader panicked: {:?}", e))??;
        }
        Ok(())
    }
}

/// Copy at most `limit + 1` bytes from `fifo` to `dest`, and discard the rest of the stream.
fn drain(mut fifo: File, dest: &Path, limit: u64) -> Result<(), Error> {
    let mut file =
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    std::io::copy(&mut (&mut fifo).take(limit.saturating_add(1)), &mut file)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    std::io::copy(&mut fifo, &mut std::io::sink()).context("Failed to discard the output")?;
    Ok(())
}

/// Run the sandbox for an execution.
///
/// It takes a `SandboxJob`, JSON serialized via standard input and prints to standard output a
/// `RawSandboxResult`, JSON serialized.
pub fn main_sandbox() -> Result<(), Error> {
    let res = match run_sandbox() {
        Ok(res) => RawSandboxResult::Success(res),
        Err(e) => RawSandboxResult::Error(format!("Error: {e:?}")),
    };
    serde_json::to_writer(stdout(), &res).context("Failed to print result")?;
    Ok(())
}

/// Run the sandbox integrated in the code-runner-tools binary.
#[derive(Clone, Debug)]
pub struct ToolsSandboxRunner {
    /// Path to the tools executable.
    tools_path: PathBuf,
}

impl ToolsSandboxRunner {
    /// Use the tools executable at the specified path.
    pub fn new<P: Into<PathBuf>>(tools_path: P) -> ToolsSandboxRunner {
        ToolsSandboxRunner {
            tools_path: tools_path.into(),
        }
    }
}

impl Default for ToolsSandboxRunner {
    fn default() -> Self {
        ToolsSandboxRunner::new(find_tools_path())
    }
}

impl SandboxRunner for ToolsSandboxRunner {
    fn run(&self, job: &SandboxJob, pid: Arc<AtomicU32>) -> RawSandboxResult {
        match tools_sandbox_internal(&self.tools_path, job, pid) {
            Ok(res) => res,
            Err(e) => RawSandboxResult::Error(format!("{e:#}")),
        }
    }
}

/// Actually run the sandbox, but with a return type that supports the `?` operator.
fn tools_sandbox_internal(
    tools_path: &Path,
    job: &SandboxJob,
    pid: Arc<AtomicU32>,
) -> Result<RawSandboxResult, Error> {
    let mut command = Command::new(tools_path);
    command
        .arg("internal-sandbox")
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // a new process group, so that it can be killed together with the sandbox
        .process_group(0);
    for var in HELPER_ENV {
        if let Some(value) = std::env::var_os(var) {
            command.env(var, value);
        }
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("Cannot spawn the sandbox ({})", tools_path.display()))?;
    if !publish_pid(&pid, child.id()) {
        kill_process_group(child.id());
        let _ = child.wait();
        bail!("The execution was stopped before the sandbox started");
    }
    let written = child
        .stdin
        .take()
        .context("Failed to open stdin")
        .and_then(|stdin| {
            serde_json::to_writer(stdin, job).context("Failed to write the job to stdin")
        });
    let output = child
        .wait_with_output()
        .context("Failed to wait for the process")?;
    if !output.status.success() {
        bail!(
            "Sandbox process failed: {}\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    written?;
    serde_json::from_slice(&output.stdout).context("Invalid output from sandbox")
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_runner_exec::STOPPED_PID;
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn job() -> SandboxJob {
        SandboxJob {
            executable: "/bin/true".into(),
            args: vec![],
            env: vec![],
            box_dir: "/tmp".into(),
            etc_dir: "/tmp".into(),
            stdin: None,
            stdout: None,
            stderr: None,
            readable_dirs: vec![],
            cpu_time: None,
            wall_time: None,
            memory: None,
            file_size: None,
            output_limit: None,
            multiprocess: false,
            uid: 1000,
            gid: 1000,
        }
    }

    #[test]
    fn test_missing_tools() {
        let runner = ToolsSandboxRunner::new("/this/tool/does/not/exist");
        let pid = Arc::new(AtomicU32::new(0));
        match runner.run(&job(), pid.clone()) {
            RawSandboxResult::Error(e) => assert!(e.contains("/this/tool/does/not/exist"), "{e}"),
            RawSandboxResult::Success(res) => panic!("Unexpected success: {res:?}"),
        }
        assert_eq!(pid.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tools_failing() {
        // `false` ignores its arguments and fails, it may exit before the job is written
        let runner = ToolsSandboxRunner::new(which::which("false").unwrap());
        let pid = Arc::new(AtomicU32::new(0));
        match runner.run(&job(), pid.clone()) {
            RawSandboxResult::Error(e) => assert!(!e.is_empty()),
            RawSandboxResult::Success(res) => panic!("Unexpected success: {res:?}"),
        }
        assert_ne!(pid.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stopped_before_start() {
        // `yes` would never exit by itself
        let runner = ToolsSandboxRunner::new(which::which("yes").unwrap());
        let pid = Arc::new(AtomicU32::new(STOPPED_PID));
        let start = Instant::now();
        match runner.run(&job(), pid.clone()) {
            RawSandboxResult::Error(e) => assert!(e.contains("stopped"), "{e}"),
            RawSandboxResult::Success(res) => panic!("Unexpected success: {res:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(pid.load(Ordering::SeqCst), STOPPED_PID);
    }

    #[test]
    fn test_output_capture_keeps_the_first_bytes() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        job.stdout = Some(tmpdir.path().join("stdout"));
        let mut config = job.configuration();
        let capture = OutputCapture::start(&job, 10, &mut config).unwrap();
        let fifo = config.stdout.clone().unwrap();
        assert_ne!(Some(fifo.clone()), job.stdout);
        assert_eq!(config.stderr, None);

        // many small writes, all of them succeed even after the limit
        let mut writer = OpenOptions::new().write(true).open(&fifo).unwrap();
        for i in 0..10000 {
            writeln!(writer, "{i}").unwrap();
        }
        drop(writer);
        capture.finish().unwrap();

        let content = std::fs::read_to_string(job.stdout.unwrap()).unwrap();
        assert_eq!(content, "0\n1\n2\n3\n4\n5");
    }

    #[test]
    fn test_output_capture_without_writer() {
        let tmpdir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        job.stdout = Some(tmpdir.path().join("stdout"));
        job.stderr = Some(tmpdir.path().join("stderr"));
        let mut config = job.configuration();
        let capture = OutputCapture::start(&job, 10, &mut config).unwrap();
        // the process never opened the FIFOs, the readers must not hang
        capture.finish().unwrap();
        assert_eq!(std::fs::read(job.stdout.unwrap()).unwrap(), b"");
        assert_eq!(std::fs::read(job.stderr.unwrap()).unwrap(), b"");
    }
}
