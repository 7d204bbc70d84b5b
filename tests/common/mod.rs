#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tabox::result::ExitStatus;
use tempfile::TempDir;

use code_runner::ToolsSandboxRunner;
use code_runner_exec::sandbox::{write_etc, READABLE_DIRS};
use code_runner_exec::{CodeExecutor, RawSandboxResult, RunnerConfig, SandboxJob, SandboxRunner};
use code_runner_lang::Language;

pub fn setup() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_nanos()
        .is_test(true)
        .try_init();
    std::env::set_var(
        "CODE_RUNNER_TOOLS_PATH",
        env!("CARGO_BIN_EXE_code-runner-tools"),
    );
}

/// Whether the sandbox can be created on this machine: it needs the user namespaces.
pub fn sandbox_available() -> bool {
    let tmpdir = TempDir::new().unwrap();
    let box_dir = tmpdir.path().join("box");
    std::fs::create_dir(&box_dir).unwrap();
    let etc_dir = tmpdir.path().join("etc");
    write_etc(&etc_dir, 1000, 1000).unwrap();
    let job = SandboxJob {
        executable: which::which("true").unwrap(),
        args: vec![],
        env: vec![],
        box_dir,
        etc_dir,
        stdin: Some("/dev/null".into()),
        stdout: Some("/dev/null".into()),
        stderr: Some("/dev/null".into()),
        readable_dirs: READABLE_DIRS
            .iter()
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir())
            .collect(),
        cpu_time: Some(1),
        wall_time: Some(2),
        memory: None,
        file_size: None,
        output_limit: None,
        multiprocess: false,
        uid: 1000,
        gid: 1000,
    };
    let res = ToolsSandboxRunner::default().run(&job, Arc::new(AtomicU32::new(0)));
    match res {
        RawSandboxResult::Success(res) if matches!(res.status, ExitStatus::ExitCode(0)) => true,
        res => {
            eprintln!("Sandbox not available: {res:?}");
            false
        }
    }
}

/// An executor using the real sandbox. The tests using it are `#[ignore]`d, since they need the
/// user namespaces and the interpreters: run them with `cargo test -- --ignored`. They fail if the
/// sandbox or the interpreter of the language are missing.
pub fn executor(language: Language, config: RunnerConfig) -> CodeExecutor {
    setup();
    assert!(
        sandbox_available(),
        "The sandbox cannot be created on this machine"
    );
    let executor = CodeExecutor::new(config, ToolsSandboxRunner::default()).unwrap();
    let interpreter = executor
        .languages()
        .list()
        .into_iter()
        .find(|(lang, _)| *lang == language)
        .and_then(|(_, path)| path);
    assert!(
        interpreter.is_some(),
        "The interpreter for {language} is not installed"
    );
    executor
}

/// The configuration used in the tests, with the sandboxes inside `dir`.
pub fn config(dir: &TempDir) -> RunnerConfig {
    RunnerConfig {
        sandboxes_dir: dir.path().join("sandboxes"),
        max_concurrent: 4,
        ..Default::default()
    }
}
