//! Language detection and the commands used to run and lint each language.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::shell_quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
    Ruby,
    Bash,
    Java,
    Rust,
    Cpp,
    C,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            "rb" => Some(Language::Ruby),
            "sh" => Some(Language::Bash),
            "java" => Some(Language::Java),
            "rs" => Some(Language::Rust),
            "cpp" => Some(Language::Cpp),
            "c" => Some(Language::C),
            _ => None,
        }
    }

    /// Language of a `/`-separated path, judged by its extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let file_name = path.rsplit('/').next()?;
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::from_extension(ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Bash => "bash",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }

    fn runner(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("python"),
            Language::JavaScript => Some("node"),
            Language::TypeScript => Some("npx ts-node"),
            Language::Bash => Some("bash"),
            Language::Ruby => Some("ruby"),
            Language::Go => Some("go run"),
            Language::Java | Language::Rust | Language::Cpp | Language::C => None,
        }
    }

    /// Shell command that executes `path`, or `None` when execution is not
    /// supported for this language.
    pub fn run_command(&self, path: &str) -> Option<String> {
        self.runner()
            .map(|runner| format!("{} {}", runner, shell_quote(path)))
    }

    /// Linters run against files of this language, in order. Empty when no
    /// linter is configured.
    pub fn linters(&self) -> &'static [Linter] {
        match self {
            Language::Python => &[Linter::Pylint, Linter::Flake8],
            Language::JavaScript | Language::TypeScript => &[Linter::Eslint],
            _ => &[],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linter {
    Pylint,
    Flake8,
    Eslint,
}

/// Installs the Python linters; run at most once per job.
pub const PYTHON_LINTER_INSTALL: &str = "pip install -q pylint flake8";

impl Linter {
    pub fn name(&self) -> &'static str {
        match self {
            Linter::Pylint => "pylint",
            Linter::Flake8 => "flake8",
            Linter::Eslint => "eslint",
        }
    }

    pub fn command(&self, path: &str) -> String {
        let path = shell_quote(path);
        match self {
            Linter::Pylint => format!("pylint --score=yes {}", path),
            Linter::Flake8 => format!("flake8 {}", path),
            Linter::Eslint => format!("npx --yes eslint {}", path),
        }
    }

    /// Install step that must precede the first use of this linter in a job.
    pub fn install_command(&self) -> Option<&'static str> {
        match self {
            Linter::Pylint | Linter::Flake8 => Some(PYTHON_LINTER_INSTALL),
            Linter::Eslint => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("web/index.js"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("web/types.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("main.go"), Some(Language::Go));
        assert_eq!(Language::from_path("scripts/run.sh"), Some(Language::Bash));
        assert_eq!(Language::from_path("lib/x.c"), Some(Language::C));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
        // a dotfile named after an extension is not source
        assert_eq!(Language::from_path("config/.py"), None);
        // extension matching is case sensitive
        assert_eq!(Language::from_path("A.PY"), None);
    }

    #[test]
    fn test_run_command() {
        assert_eq!(
            Language::Python.run_command("app/main.py").as_deref(),
            Some("python app/main.py")
        );
        assert_eq!(
            Language::TypeScript.run_command("a b.ts").as_deref(),
            Some("npx ts-node 'a b.ts'")
        );
        assert_eq!(Language::Go.run_command("main.go").as_deref(), Some("go run main.go"));
        assert!(Language::Java.run_command("Main.java").is_none());
        assert!(Language::Rust.run_command("main.rs").is_none());
    }

    #[test]
    fn test_linters_per_language() {
        assert_eq!(Language::Python.linters(), &[Linter::Pylint, Linter::Flake8]);
        assert_eq!(Language::TypeScript.linters(), &[Linter::Eslint]);
        assert!(Language::Go.linters().is_empty());
        assert!(Language::Bash.linters().is_empty());
    }

    #[test]
    fn test_linter_commands() {
        assert_eq!(Linter::Pylint.command("m.py"), "pylint --score=yes m.py");
        assert_eq!(Linter::Flake8.command("m.py"), "flake8 m.py");
        assert_eq!(Linter::Eslint.command("i.js"), "npx --yes eslint i.js");
        assert_eq!(Linter::Pylint.install_command(), Some(PYTHON_LINTER_INSTALL));
        assert!(Linter::Eslint.install_command().is_none());
    }

    #[test]
    fn test_serde_matches_as_str() {
        assert_eq!(serde_json::to_string(&Language::JavaScript).unwrap(), "\"javascript\"");
        assert_eq!(serde_json::to_string(&Language::Cpp).unwrap(), "\"cpp\"");
    }
}
