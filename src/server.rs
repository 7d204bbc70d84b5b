use std::path::PathBuf;

use anyhow::{Context, Error};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use code_runner_exec::{CodeExecutor, ExecutionRequest, ExecutionResult};
use code_runner_lang::Language;

use crate::opt::ServeOpt;
use crate::sandbox::ToolsSandboxRunner;

/// A row of the table of the languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// The language.
    pub language: Language,
    /// Whether the language can be executed at all.
    pub supported: bool,
    /// Path of the interpreter in this system, if supported and installed.
    pub interpreter: Option<PathBuf>,
}

/// The table of all the known languages, as seen by the executor.
pub fn language_table(executor: &CodeExecutor) -> Vec<LanguageInfo> {
    let languages = executor.languages();
    languages
        .list()
        .into_iter()
        .map(|(language, interpreter)| LanguageInfo {
            language,
            supported: languages.is_supported(language),
            interpreter,
        })
        .collect()
}

/// Build the HTTP router of the server.
pub fn router(executor: CodeExecutor) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/languages", get(languages))
        .layer(TraceLayer::new_for_http())
        .with_state(executor)
}

/// POST /execute
///
/// If the client disconnects, this future is dropped and the sandbox is killed.
pub async fn execute(
    State(executor): State<CodeExecutor>,
    Json(request): Json<ExecutionRequest>,
) -> Json<ExecutionResult> {
    Json(executor.execute(request).await)
}

/// GET /languages
pub async fn languages(State(executor): State<CodeExecutor>) -> Json<Vec<LanguageInfo>> {
    Json(language_table(&executor))
}

/// Entry point of `code-runner serve`.
pub fn main_serve(opt: ServeOpt) -> Result<(), Error> {
    let config = opt.execution.to_config()?;
    let executor = CodeExecutor::new(config, ToolsSandboxRunner::default())?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the runtime")?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(opt.bind)
            .await
            .with_context(|| format!("Failed to bind {}", opt.bind))?;
        info!(
            "Listening on {} (at most {} concurrent executions)",
            listener.local_addr()?,
            executor.config().max_concurrent
        );
        axum::serve(listener, router(executor))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server failed")
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
