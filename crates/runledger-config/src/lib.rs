// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-config
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Loads [`SuiteConfig`]/[`CaseConfig`] from YAML files on disk into the
//! core's typed, read-only records. This is the external config loader:
//! the core types it produces have no dependency back on it.

use runledger_core::{AssertionSpec, CaseConfig, SuiteConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading suite or case configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested file or directory does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// The file could not be read from disk.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file's contents were not valid YAML, or did not match the
    /// expected shape.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying deserialization error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Semantic validation failed after a successful parse.
    #[error("invalid config in {path}: {reason}")]
    ValidationError {
        /// Path whose contents failed validation.
        path: PathBuf,
        /// Human-readable validation failure.
        reason: String,
    },
}

fn read_yaml(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve `candidate` against `base` unless it is already absolute.
fn resolve(base: &Path, candidate: &str) -> PathBuf {
    let p = Path::new(candidate);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Rewrite every `json_schema` assertion's `schema_path` to be resolved
/// against `base_dir`, in place within the raw YAML value.
fn resolve_schema_paths(assertions: &mut serde_yaml::Value, base_dir: &Path) {
    let Some(seq) = assertions.as_sequence_mut() else {
        return;
    };
    for entry in seq {
        let Some(map) = entry.as_mapping_mut() else {
            continue;
        };
        let is_json_schema = map
            .get(serde_yaml::Value::from("type"))
            .and_then(|v| v.as_str())
            == Some("json_schema");
        if !is_json_schema {
            continue;
        }
        let key = serde_yaml::Value::from("schema_path");
        if let Some(serde_yaml::Value::String(path)) = map.get(key.clone()) {
            let resolved = resolve(base_dir, path);
            map.insert(key, serde_yaml::Value::from(resolved.display().to_string()));
        }
    }
}

/// Load a suite's configuration.
///
/// `path` may point directly at a `suite.yaml` file, or at a directory
/// containing one. Relative `agent_command` entries that resolve to an
/// existing file, `baseline_path`, `output_dir`, and any `json_schema`
/// assertion's `schema_path` are all resolved against the suite file's
/// parent directory, so the rest of the system never depends on the
/// process's current working directory.
///
/// # Errors
///
/// See [`ConfigError`] variants.
pub fn load_suite(path: &Path) -> Result<SuiteConfig, ConfigError> {
    let suite_path = if path.is_dir() {
        path.join("suite.yaml")
    } else {
        path.to_path_buf()
    };
    let base_dir = suite_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut raw = read_yaml(&suite_path)?;
    let mapping = raw.as_mapping_mut().ok_or_else(|| ConfigError::ValidationError {
        path: suite_path.clone(),
        reason: "expected a YAML mapping at the top level".to_string(),
    })?;

    if let Some(serde_yaml::Value::Sequence(argv)) =
        mapping.get_mut(serde_yaml::Value::from("agent_command"))
    {
        for part in argv.iter_mut() {
            if let serde_yaml::Value::String(s) = part {
                let candidate = resolve(&base_dir, s);
                if candidate.exists() {
                    *s = candidate.display().to_string();
                }
            }
        }
    }

    if let Some(assertions) = mapping.get_mut(serde_yaml::Value::from("assertions")) {
        resolve_schema_paths(assertions, &base_dir);
    }

    for field in ["baseline_path", "output_dir"] {
        let key = serde_yaml::Value::from(field);
        if let Some(serde_yaml::Value::String(s)) = mapping.get(key.clone()) {
            let resolved = resolve(&base_dir, s).display().to_string();
            mapping.insert(key, serde_yaml::Value::from(resolved));
        }
    }

    // The wire shape uses `suite_name`/`cases_path`/`tool_registry`/`budgets`;
    // runledger-core's field names (`name`, `cases_dir`, `allowed_tools`,
    // `budget`) are the stable Rust API, so alias them here rather than
    // coupling the core's serde shape to the file format.
    rename_key(mapping, "suite_name", "name");
    rename_key(mapping, "cases_path", "cases_dir");
    rename_key(mapping, "tool_registry", "allowed_tools");
    rename_key(mapping, "budgets", "budget");

    serde_yaml::from_value(raw).map_err(|source| ConfigError::ParseError {
        path: suite_path,
        source,
    })
}

fn rename_key(mapping: &mut serde_yaml::Mapping, from: &str, to: &str) {
    if let Some(value) = mapping.remove(serde_yaml::Value::from(from)) {
        mapping.insert(serde_yaml::Value::from(to), value);
    }
}

/// Load every case file in a suite's cases directory, sorted by file
/// name for a stable, deterministic load order.
///
/// `cases_dir` is resolved against `suite_dir` if relative. Cassette
/// paths and `json_schema` assertion paths within each case are resolved
/// against `suite_dir`.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if the directory is missing or
/// empty of `*.yaml` files; see other variants for per-file failures.
pub fn load_cases(suite_dir: &Path, cases_dir: &Path) -> Result<Vec<CaseConfig>, ConfigError> {
    let cases_dir = if cases_dir.is_absolute() {
        cases_dir.to_path_buf()
    } else {
        suite_dir.join(cases_dir)
    };
    if !cases_dir.is_dir() {
        return Err(ConfigError::FileNotFound { path: cases_dir });
    }

    let mut case_files: Vec<PathBuf> = std::fs::read_dir(&cases_dir)
        .map_err(|source| ConfigError::Io {
            path: cases_dir.clone(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
        .collect();
    case_files.sort();

    if case_files.is_empty() {
        return Err(ConfigError::FileNotFound {
            path: cases_dir.join("*.yaml"),
        });
    }

    case_files
        .into_iter()
        .map(|case_path| load_case(&case_path, suite_dir))
        .collect()
}

fn load_case(case_path: &Path, suite_dir: &Path) -> Result<CaseConfig, ConfigError> {
    let mut raw = read_yaml(case_path)?;
    let mapping = raw.as_mapping_mut().ok_or_else(|| ConfigError::ValidationError {
        path: case_path.to_path_buf(),
        reason: "expected a YAML mapping at the top level".to_string(),
    })?;

    rename_key(mapping, "cassette", "cassette_path");
    rename_key(mapping, "budgets", "budget");
    let key = serde_yaml::Value::from("cassette_path");
    if let Some(serde_yaml::Value::String(s)) = mapping.get(key.clone()) {
        let resolved = resolve(suite_dir, s).display().to_string();
        mapping.insert(key, serde_yaml::Value::from(resolved));
    }

    if let Some(assertions) = mapping.get_mut(serde_yaml::Value::from("assertions")) {
        resolve_schema_paths(assertions, suite_dir);
    }

    serde_yaml::from_value(raw).map_err(|source| ConfigError::ParseError {
        path: case_path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{contents}").unwrap();
        path
    }

    #[test]
    fn loads_minimal_suite() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "suite.yaml",
            r#"
suite_name: demo
agent_command: ["python3", "agent.py"]
mode: replay
cases_path: cases
tool_registry: ["search_docs"]
"#,
        );
        let suite = load_suite(&dir.path().join("suite.yaml")).unwrap();
        assert_eq!(suite.name, "demo");
        assert!(suite.allowed_tools.contains("search_docs"));
        assert_eq!(suite.cases_dir, dir.path().join("cases"));
    }

    #[test]
    fn load_suite_accepts_a_directory_path() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "suite.yaml",
            r#"
suite_name: demo
agent_command: ["agent"]
mode: replay
cases_path: cases
tool_registry: []
"#,
        );
        let suite = load_suite(dir.path()).unwrap();
        assert_eq!(suite.name, "demo");
    }

    #[test]
    fn missing_suite_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_suite(&dir.path().join("suite.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn loads_cases_sorted_and_resolves_cassette_path() {
        let dir = tempfile::tempdir().unwrap();
        let cases_dir = dir.path().join("cases");
        std::fs::create_dir(&cases_dir).unwrap();
        write(
            &cases_dir,
            "b.yaml",
            r#"
id: t2
input: {}
cassette: cassettes/t2.jsonl
"#,
        );
        write(
            &cases_dir,
            "a.yaml",
            r#"
id: t1
input: {"ticket": "reset password"}
cassette: cassettes/t1.jsonl
"#,
        );

        let cases = load_cases(dir.path(), Path::new("cases")).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "t1");
        assert_eq!(cases[1].id, "t2");
        assert_eq!(cases[0].cassette_path, dir.path().join("cassettes/t1.jsonl"));
    }

    #[test]
    fn empty_cases_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cases")).unwrap();
        let err = load_cases(dir.path(), Path::new("cases")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn resolves_json_schema_assertion_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "suite.yaml",
            r#"
suite_name: demo
agent_command: ["agent"]
mode: replay
cases_path: cases
tool_registry: []
assertions:
  - type: json_schema
    schema_path: schema.json
"#,
        );
        let suite = load_suite(&dir.path().join("suite.yaml")).unwrap();
        match &suite.assertions[0] {
            AssertionSpec::Known(runledger_core::KnownAssertion::JsonSchema { schema_path }) => {
                assert!(Path::new(schema_path).is_absolute());
            }
            other => panic!("expected json_schema, got {other:?}"),
        }
    }
}
