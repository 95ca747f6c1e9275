//! Test-case definitions and test-case file loading
//!
//! Files may be JSON or YAML, either a bare list of cases or an object with a
//! `test_cases` (or `testCases`) list. Field names accept both snake_case and
//! camelCase.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::config::Config;
use crate::common::{Error, Result};

/// A test case as written in a test-case file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCaseSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<PathBuf>,

    #[serde(default, alias = "inputText")]
    pub input_text: Option<String>,

    /// Explicit debugging port; reused if an instance already answers there
    #[serde(default)]
    pub port: Option<u16>,

    /// Reply wait override in milliseconds
    #[serde(default, alias = "botReplyTimeout", alias = "bot_reply_timeout")]
    pub bot_reply_timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    List(Vec<TestCaseSpec>),
    Wrapped {
        #[serde(alias = "testCases")]
        test_cases: Vec<TestCaseSpec>,
    },
}

impl CaseFile {
    fn into_cases(self) -> Vec<TestCaseSpec> {
        match self {
            CaseFile::List(cases) => cases,
            CaseFile::Wrapped { test_cases } => test_cases,
        }
    }
}

/// A fully resolved test case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    pub name: String,
    pub working_dir: PathBuf,
    pub input_text: String,
    pub port: Option<u16>,
    #[serde(skip)]
    pub bot_reply_timeout: Option<Duration>,
}

impl TestCase {
    /// Resolve a file entry against config defaults; `index` is zero-based
    pub fn resolve(spec: TestCaseSpec, index: usize, config: &Config) -> Self {
        Self {
            name: spec
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("case-{}", index + 1)),
            working_dir: spec
                .working_dir
                .unwrap_or_else(|| config.app.working_dir.clone()),
            input_text: spec
                .input_text
                .unwrap_or_else(|| config.input.default_text.clone()),
            port: spec.port,
            bot_reply_timeout: spec.bot_reply_timeout_ms.map(Duration::from_millis),
        }
    }

    /// The case run when no test-case file is involved
    ///
    /// It targets the configured base port so an application that is
    /// already running there gets reused.
    pub fn from_config(config: &Config) -> Self {
        Self::resolve(
            TestCaseSpec {
                name: Some("default".to_string()),
                port: Some(config.cdp.port),
                ..Default::default()
            },
            0,
            config,
        )
    }
}

/// Load and resolve all cases from a JSON or YAML file
pub fn load_cases(path: &Path, config: &Config) -> Result<Vec<TestCase>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    let specs = parse_cases(&content, is_yaml(path)).map_err(|e| Error::file_read(path, e))?;

    if specs.is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "no test cases in '{}'",
            path.display()
        )));
    }

    Ok(specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| TestCase::resolve(spec, index, config))
        .collect())
}

fn parse_cases(content: &str, yaml: bool) -> Result<Vec<TestCaseSpec>> {
    let file: CaseFile = if yaml {
        serde_yaml::from_str(content)?
    } else {
        serde_json::from_str(content)?
    };
    Ok(file.into_cases())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.app.working_dir = PathBuf::from("/work/default");
        config.input.default_text = "hello".to_string();
        config
    }

    #[test]
    fn test_parse_camel_case_list() {
        let specs = parse_cases(
            r#"[{"name": "a", "workingDir": "/work/a", "inputText": "hi", "botReplyTimeout": 5000}]"#,
            false,
        )
        .unwrap();
        assert_eq!(specs[0].working_dir.as_deref(), Some(Path::new("/work/a")));
        assert_eq!(specs[0].bot_reply_timeout_ms, Some(5000));
    }

    #[test]
    fn test_parse_wrapped_yaml() {
        let specs = parse_cases(
            "test_cases:\n  - name: a\n    working_dir: /work/a\n    port: 9300\n  - input_text: second\n",
            true,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].port, Some(9300));
        assert_eq!(specs[1].input_text.as_deref(), Some("second"));
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let case = TestCase::resolve(TestCaseSpec::default(), 2, &config());
        assert_eq!(case.name, "case-3");
        assert_eq!(case.working_dir, PathBuf::from("/work/default"));
        assert_eq!(case.input_text, "hello");
        assert_eq!(case.port, None);
        assert_eq!(case.bot_reply_timeout, None);
    }

    #[test]
    fn test_resolve_keeps_overrides() {
        let spec = TestCaseSpec {
            name: Some("custom".to_string()),
            working_dir: Some(PathBuf::from("/work/b")),
            input_text: Some("question".to_string()),
            port: Some(9400),
            bot_reply_timeout_ms: Some(1500),
        };
        let case = TestCase::resolve(spec, 0, &config());
        assert_eq!(case.name, "custom");
        assert_eq!(case.working_dir, PathBuf::from("/work/b"));
        assert_eq!(case.port, Some(9400));
        assert_eq!(case.bot_reply_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_single_case_targets_base_port() {
        let mut config = config();
        config.cdp.port = 9333;
        let case = TestCase::from_config(&config);
        assert_eq!(case.name, "default");
        assert_eq!(case.port, Some(9333));
        assert_eq!(case.input_text, "hello");
    }

    #[test]
    fn test_load_cases_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(&path, r#"{"testCases": [{"name": "one"}, {}]}"#).unwrap();

        let cases = load_cases(&path, &config()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].name, "case-2");
    }

    #[test]
    fn test_load_cases_rejects_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            load_cases(&path, &config()),
            Err(Error::ConfigInvalid(_))
        ));

        let missing = dir.path().join("missing.json");
        let err = load_cases(&missing, &config()).unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_malformed_file_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        std::fs::write(&path, "- name: [unclosed").unwrap();
        assert!(load_cases(&path, &config()).unwrap_err().is_setup_error());
    }
}
