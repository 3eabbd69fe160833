use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::types::{Limits, TaskSpec};

/// Environment variable the worker points at the file whose contents become
/// the task result. Every entry command redirects stdout into it.
pub const OUTPUT_ENV: &str = "CODERUN_OUTPUT";

pub const TASK_NAME: &str = "execute code";
pub const DEFAULT_CPU_LIMIT: &str = "1";
pub const DEFAULT_MEMORY_LIMIT: &str = "256m";
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported languages
/// This is the single source of truth for what `/execute` accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Node,
    Ruby,
    Java,
    Cpp,
    Go,
    Bash,
}

impl Language {
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python,
            Language::Node,
            Language::Ruby,
            Language::Java,
            Language::Cpp,
            Language::Go,
            Language::Bash,
        ]
    }

    /// Parse an already-normalized label
    pub fn from_label(label: &str) -> Option<Language> {
        match label {
            "python" => Some(Language::Python),
            "node" | "javascript" => Some(Language::Node),
            "ruby" => Some(Language::Ruby),
            "java" => Some(Language::Java),
            "c++" => Some(Language::Cpp),
            "go" => Some(Language::Go),
            "bash" => Some(Language::Bash),
            _ => None,
        }
    }

    /// (image, source file, command)
    fn runtime(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Language::Python => ("python:3", "script.py", "python script.py > $CODERUN_OUTPUT"),
            Language::Node => ("node:16", "script.js", "node script.js > $CODERUN_OUTPUT"),
            Language::Ruby => ("ruby:3", "script.rb", "ruby script.rb > $CODERUN_OUTPUT"),
            Language::Java => (
                "openjdk:17",
                "Main.java",
                "javac Main.java && java Main > $CODERUN_OUTPUT",
            ),
            Language::Cpp => (
                "gcc:11",
                "main.cpp",
                "g++ main.cpp -o main && ./main > $CODERUN_OUTPUT",
            ),
            Language::Go => ("golang:1.19", "main.go", "go run main.go > $CODERUN_OUTPUT"),
            Language::Bash => ("alpine:3.18.3", "script", "sh ./script > $CODERUN_OUTPUT"),
        }
    }

    pub fn profile(&self) -> ExecutionProfile {
        let (image, file, command) = self.runtime();
        ExecutionProfile {
            language: *self,
            container_image: image.to_string(),
            entry_command: command.to_string(),
            source_file_name: file.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT.to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Node => write!(f, "node"),
            Language::Ruby => write!(f, "ruby"),
            Language::Java => write!(f, "java"),
            Language::Cpp => write!(f, "c++"),
            Language::Go => write!(f, "go"),
            Language::Bash => write!(f, "bash"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("require: {field}")]
    EmptyInput { field: &'static str },
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

/// How a language is run: derived from the normalized label, immutable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    pub language: Language,
    pub container_image: String,
    pub entry_command: String,
    pub source_file_name: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub timeout: Duration,
}

impl ExecutionProfile {
    /// Single-file task running `code` under this profile
    pub fn task_spec(&self, code: &str) -> TaskSpec {
        TaskSpec {
            name: TASK_NAME.to_string(),
            image: self.container_image.clone(),
            run: self.entry_command.clone(),
            timeout: humantime::format_duration(self.timeout).to_string(),
            limits: Some(Limits {
                cpus: self.cpu_limit.clone(),
                memory: self.memory_limit.clone(),
            }),
            files: BTreeMap::from([(self.source_file_name.clone(), code.to_string())]),
        }
    }
}

/// Normalize a free-form language label (trim, case-fold) and look it up
pub fn resolve(label: &str) -> Result<ExecutionProfile, ResolveError> {
    let normalized = label.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ResolveError::EmptyInput { field: "language" });
    }
    Language::from_label(&normalized)
        .map(|lang| lang.profile())
        .ok_or_else(|| ResolveError::UnsupportedLanguage(label.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_python() {
        let profile = resolve("python").unwrap();
        assert_eq!(profile.language, Language::Python);
        assert_eq!(profile.container_image, "python:3");
        assert_eq!(profile.source_file_name, "script.py");
        assert_eq!(profile.entry_command, "python script.py > $CODERUN_OUTPUT");
    }

    #[test]
    fn test_resolve_is_case_and_whitespace_insensitive() {
        for label in ["Python", "PYTHON", "  python\t", "\npYtHoN "] {
            assert_eq!(resolve(label).unwrap().language, Language::Python, "{label:?}");
        }
        assert_eq!(resolve(" C++ ").unwrap().language, Language::Cpp);
    }

    #[test]
    fn test_javascript_is_node() {
        assert_eq!(resolve("javascript").unwrap(), resolve("node").unwrap());
        assert_eq!(resolve("JavaScript").unwrap().container_image, "node:16");
    }

    #[test]
    fn test_full_table() {
        let expected = [
            ("python", "python:3", "script.py"),
            ("node", "node:16", "script.js"),
            ("ruby", "ruby:3", "script.rb"),
            ("java", "openjdk:17", "Main.java"),
            ("c++", "gcc:11", "main.cpp"),
            ("go", "golang:1.19", "main.go"),
            ("bash", "alpine:3.18.3", "script"),
        ];
        for (label, image, file) in expected {
            let profile = resolve(label).unwrap();
            assert_eq!(profile.container_image, image);
            assert_eq!(profile.source_file_name, file);
            assert!(profile.entry_command.ends_with("> $CODERUN_OUTPUT"));
            assert!(profile.entry_command.contains(file));
        }
    }

    #[test]
    fn test_every_variant_round_trips_through_label() {
        for lang in Language::all_variants() {
            assert_eq!(Language::from_label(&lang.to_string()), Some(*lang));
        }
    }

    #[test]
    fn test_limits_are_uniform() {
        for lang in Language::all_variants() {
            let profile = lang.profile();
            assert_eq!(profile.cpu_limit, DEFAULT_CPU_LIMIT);
            assert_eq!(profile.memory_limit, DEFAULT_MEMORY_LIMIT);
            assert_eq!(profile.timeout, DEFAULT_TASK_TIMEOUT);
        }
    }

    #[test]
    fn test_empty_label() {
        assert_eq!(resolve(""), Err(ResolveError::EmptyInput { field: "language" }));
        assert_eq!(resolve("   "), Err(ResolveError::EmptyInput { field: "language" }));
    }

    #[test]
    fn test_unsupported_label() {
        let err = resolve(" cobol ").unwrap_err();
        assert_eq!(err, ResolveError::UnsupportedLanguage("cobol".to_string()));
        assert_eq!(err.to_string(), "unsupported language: cobol");
    }

    #[test]
    fn test_task_spec_from_profile() {
        let task = resolve("python").unwrap().task_spec("print(1)");
        assert_eq!(task.name, TASK_NAME);
        assert_eq!(task.image, "python:3");
        assert_eq!(task.timeout, "5s");
        assert_eq!(task.files.len(), 1);
        assert_eq!(task.files["script.py"], "print(1)");
        let limits = task.limits.unwrap();
        assert_eq!(limits.cpus, "1");
        assert_eq!(limits.memory, "256m");
    }
}
