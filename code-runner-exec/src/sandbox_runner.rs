use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tabox::result::{ExitStatus, ResourceUsage, SandboxExecutionResult};

use crate::{RawSandboxResult, SandboxJob};

/// Value of the PID slot of an execution that has been stopped.
pub const STOPPED_PID: u32 = u32::MAX;

/// Something able to spawn a sandbox, wait for it to exit and return the results.
///
/// The runner is called from a blocking thread, it may block for the whole duration of the
/// execution. If the process started by the runner is the leader of a new process group, its PID
/// has to be published in `pid` with [`publish_pid`] as soon as possible: the whole group is killed
/// if the execution times out or gets cancelled, which makes `run` return early. If the execution
/// was stopped before the PID was published, the runner has to kill the group itself.
pub trait SandboxRunner: Send + Sync {
    /// Spawn a sandbox for the job, set the PID as soon as possible and wait for it to exit. Parse
    /// the outcome of the sandbox and return it.
    fn run(&self, job: &SandboxJob, pid: Arc<AtomicU32>) -> RawSandboxResult;
}

/// Store the PID of the process group leader started for an execution. Returns `false` if the
/// execution has already been stopped, in that case the group has not been killed yet.
pub fn publish_pid(slot: &AtomicU32, pid: u32) -> bool {
    slot.compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst).is_ok()
}

/// Stop the execution of the slot: kill the process group if it has been published, otherwise
/// make the next [`publish_pid`] fail.
pub fn stop_process_group(slot: &AtomicU32) {
    match slot.swap(STOPPED_PID, Ordering::SeqCst) {
        0 => debug!("Execution stopped before the sandbox started"),
        STOPPED_PID => {}
        pid => kill_process_group(pid),
    }
}

/// Kill with SIGKILL the process group led by `pid`.
pub fn kill_process_group(pid: u32) {
    debug!("Killing process group {}", pid);
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("Cannot kill process group {}: {}", pid, e);
    }
}

/// A fake sandbox that don't actually spawn anything and always return an error.
#[derive(Default, Debug)]
pub struct ErrorSandboxRunner;

impl SandboxRunner for ErrorSandboxRunner {
    fn run(&self, _job: &SandboxJob, _pid: Arc<AtomicU32>) -> RawSandboxResult {
        RawSandboxResult::Error("Nope".to_owned())
    }
}

/// A fake sandbox that don't actually spawn anything and always return successfully with exit code
/// 0, without writing any output.
#[derive(Default, Debug)]
pub struct SuccessSandboxRunner;

impl SandboxRunner for SuccessSandboxRunner {
    fn run(&self, _job: &SandboxJob, _pid: Arc<AtomicU32>) -> RawSandboxResult {
        RawSandboxResult::Success(SandboxExecutionResult {
            status: ExitStatus::ExitCode(0),
            resource_usage: ResourceUsage {
                memory_usage: 0,
                user_cpu_time: 0.0,
                system_cpu_time: 0.0,
                wall_time_usage: 0.0,
            },
        })
    }
}

impl<S: SandboxRunner> SandboxRunner for Arc<S> {
    fn run(&self, job: &SandboxJob, pid: Arc<AtomicU32>) -> RawSandboxResult {
        self.as_ref().run(job, pid)
    }
}
