use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A language a snippet can be written in. Not all of them are supported, see
/// [`LanguageManager`](struct.LanguageManager.html).
///
/// It is deserialized like it is parsed: ignoring the case and accepting the aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Language {
    /// Python 3.
    Python,
    /// JavaScript, run with Node.js.
    JavaScript,
    /// Java.
    Java,
    /// C++.
    Cpp,
}

/// The string is not the name of a known language.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown language: {0:?}")]
pub struct UnknownLanguage(pub String);

lazy_static! {
    /// All the names, lowercase, a language can be referred to.
    static ref LANGUAGE_NAMES: HashMap<&'static str, Language> = {
        let mut names = HashMap::new();
        for lang in Language::all() {
            names.insert(lang.name(), *lang);
        }
        names.insert("py", Language::Python);
        names.insert("python3", Language::Python);
        names.insert("js", Language::JavaScript);
        names.insert("node", Language::JavaScript);
        names.insert("c++", Language::Cpp);
        names
    };
}

impl Language {
    /// All the known languages.
    pub fn all() -> &'static [Language] {
        &[
            Language::Python,
            Language::JavaScript,
            Language::Java,
            Language::Cpp,
        ]
    }

    /// The canonical name of the language, the same used when serializing it.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LANGUAGE_NAMES
            .get(s.trim().to_lowercase().as_str())
            .copied()
            .ok_or_else(|| UnknownLanguage(s.to_owned()))
    }
}

impl TryFrom<String> for Language {
    type Error = UnknownLanguage;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speculoos::prelude::*;

    #[test]
    fn test_from_str() {
        assert_that!("python".parse::<Language>()).is_ok().is_equal_to(Language::Python);
        assert_that!("JavaScript".parse::<Language>()).is_ok().is_equal_to(Language::JavaScript);
        assert_that!(" cpp ".parse::<Language>()).is_ok().is_equal_to(Language::Cpp);
    }

    #[test]
    fn test_from_str_aliases() {
        assert_that!("py".parse::<Language>()).is_ok().is_equal_to(Language::Python);
        assert_that!("node".parse::<Language>()).is_ok().is_equal_to(Language::JavaScript);
        assert_that!("C++".parse::<Language>()).is_ok().is_equal_to(Language::Cpp);
    }

    #[test]
    fn test_from_str_unknown() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert_eq!(err, UnknownLanguage("cobol".into()));
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_display_roundtrips_names() {
        for lang in Language::all() {
            assert_eq!(lang.to_string().parse::<Language>().unwrap(), *lang);
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Language::JavaScript).unwrap(),
            "\"javascript\""
        );
        let lang: Language = serde_json::from_str("\"js\"").unwrap();
        assert_eq!(lang, Language::JavaScript);
        let lang: Language = serde_json::from_str("\"cpp\"").unwrap();
        assert_eq!(lang, Language::Cpp);
        assert!(serde_json::from_str::<Language>("\"cobol\"").is_err());
    }

    #[test]
    fn test_deserialize_like_from_str() {
        for name in ["Python", "python3", "PY", "Node", "C++"] {
            let lang: Language = serde_json::from_str(&format!("{name:?}")).unwrap();
            assert_eq!(lang, name.parse::<Language>().unwrap());
        }
        let err = serde_json::from_str::<Language>("\"cobol\"").unwrap_err();
        assert!(err.to_string().contains("cobol"), "{err}");
    }
}
