use std::io::Read;
use std::path::Path;

use anyhow::{Context, Error};

use code_runner_exec::{CancellationToken, CodeExecutor, ExecutionRequest, ExecutionResult};

use crate::opt::{LanguagesOpt, RunOpt};
use crate::sandbox::ToolsSandboxRunner;
use crate::server::language_table;

/// Entry point of `code-runner run`. Returns whether the snippet ran successfully.
pub fn main_run(opt: RunOpt) -> Result<bool, Error> {
    let code = read_code(opt.file.as_deref())?;
    let stdin = match (&opt.stdin, &opt.stdin_file) {
        (Some(stdin), _) => Some(stdin.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read stdin file {}", path.display()))?,
        ),
        (None, None) => None,
    };
    let config = opt.execution.to_config()?;
    let executor = CodeExecutor::new(config, ToolsSandboxRunner::default())?;
    let request = ExecutionRequest {
        code,
        language: opt.language,
        stdin,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the runtime")?;
    let result = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let ctrlc = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, cancelling the execution");
                    cancel.cancel();
                }
            }
        });
        let result = executor.execute_with_cancel(request, cancel).await;
        ctrlc.abort();
        result
    });

    print_result(&result, opt.json)?;
    Ok(result.success)
}

/// Entry point of `code-runner languages`.
pub fn main_languages(opt: LanguagesOpt) -> Result<(), Error> {
    let config = opt.execution.to_config()?;
    let executor = CodeExecutor::new(config, ToolsSandboxRunner::default())?;
    let languages = language_table(&executor);
    if opt.json {
        serde_json::to_writer_pretty(std::io::stdout(), &languages)
            .context("Failed to print the languages")?;
        println!();
        return Ok(());
    }
    for lang in languages {
        let status = match (lang.supported, &lang.interpreter) {
            (false, _) => "not supported".to_string(),
            (true, None) => "interpreter not found".to_string(),
            (true, Some(path)) => path.display().to_string(),
        };
        println!("{:<12} {}", lang.language.name(), status);
    }
    Ok(())
}

/// Read the code from the file, or from stdin if the file is missing or `-`.
fn read_code(file: Option<&Path>) -> Result<String, Error> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read code from {}", path.display())),
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
    }
}

/// Print the outcome of the execution: the output streams as they are, or the whole result as JSON.
fn print_result(result: &ExecutionResult, json: bool) -> Result<(), Error> {
    if json {
        serde_json::to_writer_pretty(std::io::stdout(), result)
            .context("Failed to print the result")?;
        println!();
        return Ok(());
    }
    print!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
        if !result.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    info!(
        "Execution completed in {:.3}s: {:?} (exit code {})",
        result.elapsed_seconds, result.status, result.exit_code
    );
    if let Some(resources) = &result.resources {
        debug!("Resources used: {:?}", resources);
    }
    Ok(())
}
