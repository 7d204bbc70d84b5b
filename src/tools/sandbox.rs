use std::path::PathBuf;

use anyhow::{anyhow, Context, Error};
use tabox::{Sandbox, SandboxImplementation};

use code_runner_exec::sandbox::{write_etc, BOX_ROOT, READABLE_DIRS, SANDBOX_PATH};
use code_runner_exec::SandboxJob;

use crate::tools::opt::SandboxOpt;

/// Build the job for running the command of the options, with the same isolation of the snippets
/// but inheriting stdin, stdout and stderr.
fn sandbox_job(opt: SandboxOpt, etc_dir: PathBuf) -> Result<SandboxJob, Error> {
    let box_dir = opt
        .workdir
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| "/".into());
    let (executable, args) = match opt.command.split_first() {
        Some((command, args)) => (
            which::which(command).with_context(|| format!("Command {command:?} not found"))?,
            args.to_vec(),
        ),
        None => (PathBuf::from("/bin/sh"), vec![]),
    };

    let mut readable_dirs = vec![];
    for dir in READABLE_DIRS.iter().map(PathBuf::from) {
        if dir.is_dir() {
            readable_dirs.push(dir);
        }
    }
    for dir in opt.readable_dirs {
        if dir.is_dir() {
            readable_dirs.push(dir);
        } else {
            warn!("Cannot mount directory {}", dir.display());
        }
    }

    Ok(SandboxJob {
        executable,
        args,
        env: vec![
            ("PATH".into(), SANDBOX_PATH.into()),
            ("HOME".into(), BOX_ROOT.into()),
        ],
        box_dir,
        etc_dir,
        stdin: None,
        stdout: None,
        stderr: None,
        readable_dirs,
        cpu_time: opt.time_limit,
        wall_time: opt.wall_time_limit,
        memory: opt.memory_limit.map(|kib| kib * 1024),
        file_size: None,
        output_limit: None,
        multiprocess: !opt.single_process,
        uid: opt.uid,
        gid: opt.gid,
    })
}

pub fn main_sandbox(opt: SandboxOpt) -> Result<(), Error> {
    let tempdir = tempfile::Builder::new()
        .prefix("code-runner-sandbox")
        .tempdir()?;
    let etc_dir = tempdir.path().join("etc");
    write_etc(&etc_dir, opt.uid, opt.gid)?;

    let job = sandbox_job(opt, etc_dir)?;
    let config = job.configuration();
    debug!("Config: {:#?}", config);

    let sandbox = SandboxImplementation::run(config)
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to create sandbox")?;
    let res = sandbox
        .wait()
        .map_err(|e| anyhow!("{}", e))
        .context("Failed to wait sandbox")?;

    debug!("Result: {:#?}", res);
    eprintln!("{:?} ({:?})", res.status, res.resource_usage);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn opt(command: &[&str]) -> SandboxOpt {
        SandboxOpt {
            workdir: Some("/tmp".into()),
            memory_limit: Some(1024),
            time_limit: None,
            wall_time_limit: Some(2),
            single_process: true,
            readable_dirs: vec!["/this/dir/does/not/exist".into()],
            uid: 1000,
            gid: 1000,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_sandbox_job() {
        let job = sandbox_job(opt(&["sh", "-c", "true"]), "/tmp/etc".into()).unwrap();
        assert!(job.executable.is_absolute());
        assert_eq!(job.args, vec!["-c", "true"]);
        assert_eq!(job.box_dir, PathBuf::from("/tmp"));
        assert_eq!(job.memory, Some(1024 * 1024));
        assert_eq!(job.wall_time, Some(2));
        assert!(!job.multiprocess);
        assert_eq!(job.stdout, None);
        assert!(job
            .readable_dirs
            .iter()
            .all(|dir| dir != &PathBuf::from("/this/dir/does/not/exist")));
    }

    #[test]
    fn test_sandbox_job_default_shell() {
        let job = sandbox_job(opt(&[]), "/tmp/etc".into()).unwrap();
        assert_eq!(job.executable, PathBuf::from("/bin/sh"));
        assert!(job.args.is_empty());
    }

    #[test]
    fn test_sandbox_job_missing_command() {
        let err = sandbox_job(opt(&["not-a-command-for-sure"]), "/tmp/etc".into()).unwrap_err();
        assert!(err.to_string().contains("not-a-command-for-sure"));
    }
}
