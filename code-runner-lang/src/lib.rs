//! Crate for managing the languages a snippet can be written in.
//!
//! A [`Language`](enum.Language.html) is only an identifier: the way a snippet in that language is
//! actually run is described by an [`InterpreterDescriptor`](struct.InterpreterDescriptor.html).
//! Languages without a descriptor are known but not supported, asking for them must be answered
//! without running anything.
//!
//! The entry point of this crate is [`LanguageManager`](struct.LanguageManager.html), it keeps the
//! table from language to descriptor, built from an
//! [`InterpreterConfiguration`](struct.InterpreterConfiguration.html).
//!
//! # Example
//!
//! ```
//! use code_runner_lang::{InterpreterConfiguration, Language, LanguageManager};
//!
//! let manager = LanguageManager::new(InterpreterConfiguration::default());
//! let python = manager.descriptor(Language::Python).expect("python is supported");
//! let args = python.args("print(42)", None);
//! assert_eq!(args.last().unwrap(), "print(42)");
//! assert!(manager.descriptor(Language::Java).is_none());
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate lazy_static;

mod interpreter;
mod language;

pub use interpreter::{InterpreterConfiguration, InterpreterDescriptor};
pub use language::{Language, UnknownLanguage};

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Manager of the supported languages, maps every supported [`Language`](enum.Language.html) to the
/// descriptor of its interpreter.
#[derive(Debug, Clone)]
pub struct LanguageManager {
    /// The descriptors of the supported languages.
    descriptors: BTreeMap<Language, InterpreterDescriptor>,
}

impl LanguageManager {
    /// Make a new `LanguageManager` using the provided interpreters.
    pub fn new(config: InterpreterConfiguration) -> LanguageManager {
        let descriptors = Language::all()
            .iter()
            .filter_map(|lang| InterpreterDescriptor::for_language(*lang, &config))
            .map(|desc| (desc.language, desc))
            .collect();
        LanguageManager { descriptors }
    }

    /// The descriptor of the interpreter of the language, `None` if the language is not supported.
    pub fn descriptor(&self, language: Language) -> Option<&InterpreterDescriptor> {
        self.descriptors.get(&language)
    }

    /// Whether the language can be executed.
    pub fn is_supported(&self, language: Language) -> bool {
        self.descriptors.contains_key(&language)
    }

    /// List all the known languages, with the path of their interpreter in this system. The path is
    /// `None` if the language is not supported or the interpreter is not installed.
    pub fn list(&self) -> Vec<(Language, Option<PathBuf>)> {
        Language::all()
            .iter()
            .map(|lang| {
                let path = self
                    .descriptor(*lang)
                    .and_then(|desc| desc.resolve_binary().ok());
                (*lang, path)
            })
            .collect()
    }
}

impl Default for LanguageManager {
    fn default() -> Self {
        LanguageManager::new(InterpreterConfiguration::from_env())
    }
}
