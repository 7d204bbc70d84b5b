//! Finds the location of the `code-runner-tools` executable.

/// Environment variable with the path of the `code-runner-tools` executable.
pub const TOOLS_PATH_ENV: &str = "CODE_RUNNER_TOOLS_PATH";

/// Locates the `code-runner-tools` executable.
pub fn find_tools_path() -> std::path::PathBuf {
    // Check environment variable.
    if let Some(path) = std::env::var_os(TOOLS_PATH_ENV) {
        return path.into();
    }
    // Check in the directory of the current executable.
    let current_exe = std::env::current_exe();
    if let Ok(current_exe) = current_exe {
        let candidate_tools_path = current_exe.with_file_name("code-runner-tools");
        if candidate_tools_path.exists() {
            return candidate_tools_path;
        }
    }

    // Default to looking in PATH.
    "code-runner-tools".to_owned().into()
}
