use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use code_runner_lang::LanguageManager;

use crate::sandbox::{status_and_resources, Sandbox};
use crate::sandbox_runner::stop_process_group;
use crate::{
    ConfigError, ExecutionRequest, ExecutionResult, ExecutionStatus, RawSandboxResult,
    RunnerConfig, SandboxRunner, EMPTY_CODE_MESSAGE,
};

/// How the wait for the sandbox ended.
enum WaitOutcome {
    /// The runner returned.
    Done(Result<RawSandboxResult, tokio::task::JoinError>),
    /// The timeout expired first.
    Timeout,
    /// The caller cancelled the execution first.
    Cancelled,
}

/// The internals of the executor, shared between the clones.
struct ExecutorInner {
    /// The configuration of the executor.
    config: RunnerConfig,
    /// The supported languages.
    languages: LanguageManager,
    /// The implementation of the sandbox.
    runner: Box<dyn SandboxRunner>,
    /// One permit for each execution that can run at the same time.
    permits: Semaphore,
    /// Number of executions waiting for a permit.
    queued: AtomicUsize,
}

/// The service that executes the snippets. Cloning this struct is cheap and gives a handle to the
/// same executor, sharing the limit on the concurrent executions.
///
/// Every execution is independent: it runs in its own sandbox, with its own files, and its result
/// depends only on its request.
#[derive(Clone)]
pub struct CodeExecutor {
    inner: Arc<ExecutorInner>,
}

impl CodeExecutor {
    /// Make a new executor that runs the sandboxes with `runner`.
    pub fn new<R: SandboxRunner + 'static>(
        config: RunnerConfig,
        runner: R,
    ) -> Result<CodeExecutor, ConfigError> {
        config.validate()?;
        let languages = LanguageManager::new(config.interpreters());
        Ok(CodeExecutor {
            inner: Arc::new(ExecutorInner {
                permits: Semaphore::new(config.max_concurrent),
                queued: AtomicUsize::new(0),
                config,
                languages,
                runner: Box::new(runner),
            }),
        })
    }

    /// The configuration of this executor.
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// The languages known by this executor.
    pub fn languages(&self) -> &LanguageManager {
        &self.inner.languages
    }

    /// Execute the request and wait for its result.
    ///
    /// Dropping the returned future kills the sandbox, if it is running.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Execute the request and wait for its result, or until `cancel` is cancelled.
    pub async fn execute_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        if request.code.is_empty() {
            return ExecutionResult::invalid_request(EMPTY_CODE_MESSAGE);
        }
        let Some(descriptor) = self.inner.languages.descriptor(request.language) else {
            debug!("Refusing to run unsupported language {}", request.language);
            return ExecutionResult::unsupported_language(request.language);
        };

        let _permit = tokio::select! {
            permit = self.inner.admit() => match permit {
                Some(permit) => permit,
                None => {
                    warn!("Execution queue is full, rejecting request");
                    return ExecutionResult::rejected();
                }
            },
            _ = cancel.cancelled() => return ExecutionResult::cancelled(Duration::ZERO),
        };

        let config = &self.inner.config;
        let timeout = config.limits.timeout;
        let start = Instant::now();
        let sandbox = match Sandbox::new(
            config,
            descriptor,
            &request.code,
            request.stdin.as_deref(),
        ) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                warn!("Cannot prepare the sandbox: {:?}", e);
                return ExecutionResult::launch_failure(format!("{e:#}"));
            }
        };
        debug!(
            "Running {} snippet in sandbox at {:?}",
            request.language,
            sandbox.path()
        );

        let pid = Arc::new(AtomicU32::new(0));
        // if this future is dropped while the sandbox is running, the sandbox is killed
        let guard = scopeguard::guard(pid.clone(), |pid| stop_process_group(&pid));
        let inner = self.inner.clone();
        let job = sandbox.job().clone();
        let mut handle = tokio::task::spawn_blocking(move || inner.runner.run(&job, pid));

        let outcome = tokio::select! {
            res = &mut handle => WaitOutcome::Done(res),
            _ = tokio::time::sleep(timeout) => WaitOutcome::Timeout,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };
        let elapsed = start.elapsed();
        match outcome {
            WaitOutcome::Done(res) => {
                // the process has been reaped, its PID may be reused
                let _ = scopeguard::ScopeGuard::into_inner(guard);
                match res {
                    Ok(raw) => self.collect(&sandbox, raw, elapsed),
                    Err(e) => {
                        error!("Sandbox runner panicked: {:?}", e);
                        ExecutionResult::launch_failure(format!("Sandbox runner failed: {e}"))
                    }
                }
            }
            WaitOutcome::Timeout => {
                info!("Execution timed out after {:?}", timeout);
                drop(guard);
                if let Err(e) = handle.await {
                    warn!("Sandbox runner failed after the timeout: {:?}", e);
                }
                ExecutionResult::timeout(timeout)
            }
            WaitOutcome::Cancelled => {
                info!("Execution cancelled after {:?}", elapsed);
                drop(guard);
                if let Err(e) = handle.await {
                    warn!("Sandbox runner failed after the cancellation: {:?}", e);
                }
                ExecutionResult::cancelled(elapsed)
            }
        }
    }

    /// Build the result of a sandbox that ran to completion.
    fn collect(
        &self,
        sandbox: &Sandbox,
        raw: RawSandboxResult,
        elapsed: Duration,
    ) -> ExecutionResult {
        let limits = &self.inner.config.limits;
        let res = match raw {
            RawSandboxResult::Success(res) => res,
            RawSandboxResult::Error(e) => {
                warn!("Sandbox failed: {}", e);
                return ExecutionResult::launch_failure(e);
            }
        };
        let (status, resources) = status_and_resources(&res, limits);
        trace!("Sandbox result: {:?} -> {:?}", res, status);
        if status == ExecutionStatus::Timeout {
            return ExecutionResult::timeout(limits.timeout);
        }
        let output = sandbox
            .stdout(limits.output)
            .and_then(|stdout| Ok((stdout, sandbox.stderr(limits.output)?)));
        match output {
            Ok((stdout, stderr)) => {
                ExecutionResult::completed(status, stdout, stderr, elapsed, resources)
            }
            Err(e) => {
                warn!("Cannot read the output of the sandbox: {:?}", e);
                ExecutionResult::launch_failure(format!("{e:#}"))
            }
        }
    }
}

impl ExecutorInner {
    /// Wait for a free execution slot. Returns `None` if too many executions are already waiting.
    async fn admit(&self) -> Option<SemaphorePermit<'_>> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Some(permit);
        }
        if self.queued.fetch_add(1, Ordering::SeqCst) >= self.config.max_queued {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        defer! {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        self.permits.acquire().await.ok()
    }
}
