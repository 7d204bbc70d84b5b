use std::path::PathBuf;

use crate::Language;

/// Environment variable with the Python interpreter to use.
const PYTHON_ENV: &str = "CODE_RUNNER_PYTHON";
/// Environment variable with the Node.js interpreter to use.
const NODE_ENV: &str = "CODE_RUNNER_NODE";

/// Which interpreter binaries to use for the supported languages. Relative names are searched in
/// the `$PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfiguration {
    /// The Python 3 interpreter.
    pub python: PathBuf,
    /// The Node.js interpreter.
    pub node: PathBuf,
}

impl Default for InterpreterConfiguration {
    fn default() -> Self {
        InterpreterConfiguration {
            python: "python3".into(),
            node: "node".into(),
        }
    }
}

impl InterpreterConfiguration {
    /// Build the configuration from the defaults, overridden by the `CODE_RUNNER_PYTHON` and
    /// `CODE_RUNNER_NODE` environment variables.
    pub fn from_env() -> InterpreterConfiguration {
        let mut config = InterpreterConfiguration::default();
        if let Some(python) = std::env::var_os(PYTHON_ENV) {
            config.python = python.into();
        }
        if let Some(node) = std::env::var_os(NODE_ENV) {
            config.node = node.into();
        }
        config
    }
}

/// How to run a snippet of a language: which interpreter, in "evaluate string" mode, with which
/// flags. The code is always passed as the last argument, never through a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterDescriptor {
    /// The language this interpreter runs.
    pub language: Language,
    /// The interpreter binary, searched in the `$PATH` if relative.
    pub binary: PathBuf,
    /// Flags to pass before the program text.
    pub flags: Vec<String>,
    /// The flag that makes the interpreter evaluate the next argument as the program.
    pub eval_flag: &'static str,
    /// Whether the interpreter needs to spawn threads or processes.
    pub multiprocess: bool,
    /// Flag prefix for limiting the heap from inside the interpreter, the limit in MiB is appended.
    ///
    /// Interpreters that reserve a lot of address space at startup cannot run under an address
    /// space limit, for them the memory ceiling is enforced with this flag instead.
    pub heap_limit_flag: Option<&'static str>,
}

impl InterpreterDescriptor {
    /// The descriptor for the language, `None` if there is no way to run the language.
    pub fn for_language(
        language: Language,
        config: &InterpreterConfiguration,
    ) -> Option<InterpreterDescriptor> {
        match language {
            Language::Python => Some(InterpreterDescriptor {
                language,
                binary: config.python.clone(),
                // isolated mode: ignore PYTHON* env vars and the user site-packages
                flags: vec!["-I".into()],
                eval_flag: "-c",
                multiprocess: false,
                heap_limit_flag: None,
            }),
            Language::JavaScript => Some(InterpreterDescriptor {
                language,
                binary: config.node.clone(),
                flags: vec![],
                eval_flag: "-e",
                // V8 uses worker threads even for trivial scripts
                multiprocess: true,
                heap_limit_flag: Some("--max-old-space-size="),
            }),
            Language::Java | Language::Cpp => None,
        }
    }

    /// The command line arguments for running `code`. If `memory_limit` (in KiB) is provided and the
    /// interpreter limits its own heap, the limit is passed to it.
    pub fn args(&self, code: &str, memory_limit: Option<u64>) -> Vec<String> {
        let mut args = self.flags.clone();
        if let (Some(flag), Some(memory)) = (self.heap_limit_flag, memory_limit) {
            args.push(format!("{}{}", flag, (memory / 1024).max(1)));
        }
        args.push(self.eval_flag.to_owned());
        args.push(code.to_owned());
        args
    }

    /// Whether the memory ceiling can be enforced by the sandbox as an address space limit.
    pub fn address_space_limit(&self) -> bool {
        self.heap_limit_flag.is_none()
    }

    /// Find the absolute path of the interpreter in this system.
    pub fn resolve_binary(&self) -> Result<PathBuf, which::Error> {
        which::which(&self.binary)
    }
}
