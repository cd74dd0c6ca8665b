//! Declarative conformance suites.
//!
//! A suite is a YAML file of cases, each a list of CLI steps with expected
//! output. Every case runs against its own freshly started backend.

pub mod execute;
pub mod report;

pub use execute::{CaseOutcome, CaseStatus, SuiteOutcome, SuiteRunner};
pub use report::{ReportFormat, render_report};

use crate::error::{HarnessError, HarnessResult};
use crate::normalize::ExpectedOutput;
use crate::version::{Boundary, VersionBranches};
use anyhow::{Context, Result, anyhow};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    pub name: String,
    /// Steps run at the start of every case
    #[serde(default)]
    pub setup: Vec<Step>,
    pub cases: Vec<Case>,
    /// File the suite was loaded from
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Case {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Arguments passed to the CLI; `{file:<path>}` is replaced by the resolved path
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_versions: Option<VersionedExpectation>,
    /// Defaults to 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_exit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_stderr_contains: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VersionedExpectation {
    pub branches: Vec<VersionBranchInput>,
    pub otherwise: Vec<String>,
}

/// One branch: exactly one of `below` and `at_most` must be set
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VersionBranchInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most: Option<u32>,
    pub expect: Vec<String>,
}

impl VersionBranchInput {
    fn boundary(&self) -> HarnessResult<Boundary> {
        match (self.below, self.at_most) {
            (Some(n), None) => Ok(Boundary::Below(n)),
            (None, Some(n)) => Ok(Boundary::AtMost(n)),
            _ => Err(HarnessError::InvalidBranches(
                "each branch needs exactly one of 'below' or 'at_most'".to_string(),
            )),
        }
    }
}

impl Step {
    /// Expected stdout for this step, if it checks stdout at all
    pub fn expectation(&self) -> HarnessResult<Option<VersionBranches<ExpectedOutput>>> {
        match (&self.expect, &self.expect_versions) {
            (Some(_), Some(_)) => Err(HarnessError::InvalidConfig(
                "a step cannot set both 'expect' and 'expect_versions'".to_string(),
            )),
            (Some(lines), None) => Ok(Some(VersionBranches::always(ExpectedOutput::from_lines(
                lines.iter().cloned(),
            )))),
            (None, Some(versions)) => {
                let branches = versions
                    .branches
                    .iter()
                    .map(|branch| {
                        Ok((
                            branch.boundary()?,
                            ExpectedOutput::from_lines(branch.expect.iter().cloned()),
                        ))
                    })
                    .collect::<HarnessResult<Vec<_>>>()?;
                let otherwise = ExpectedOutput::from_lines(versions.otherwise.iter().cloned());
                VersionBranches::new(branches, otherwise).map(Some)
            }
            (None, None) => Ok(None),
        }
    }

    pub fn expected_exit(&self) -> i32 {
        self.expect_exit.unwrap_or(0)
    }

    /// Whether running this step needs the CLI version
    pub fn is_version_gated(&self) -> bool {
        self.expect_versions.is_some()
    }
}

impl Suite {
    /// Reject malformed steps before any backend is started
    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(anyhow!("suite '{}' has no cases", self.name));
        }

        let setup = self.setup.iter().map(|step| ("setup", step));
        let cases = self
            .cases
            .iter()
            .flat_map(|case| case.steps.iter().map(move |step| (case.name.as_str(), step)));

        for (index, (owner, step)) in setup.chain(cases).enumerate() {
            if step.args.is_empty() {
                return Err(anyhow!("step {} of '{}' has no args", index + 1, owner));
            }
            step.expectation()
                .with_context(|| format!("invalid step `{}` in '{}'", step.args.join(" "), owner))?;
        }
        Ok(())
    }

    /// Cases whose name matches `filter`: a glob when it has wildcards, else a substring
    pub fn selected_cases(&self, filter: Option<&str>) -> Result<Vec<&Case>> {
        let Some(filter) = filter else {
            return Ok(self.cases.iter().collect());
        };

        if filter.contains(['*', '?', '[']) {
            let pattern = Pattern::new(filter)
                .with_context(|| format!("Invalid case filter '{}'", filter))?;
            Ok(self
                .cases
                .iter()
                .filter(|case| pattern.matches(&case.name))
                .collect())
        } else {
            Ok(self
                .cases
                .iter()
                .filter(|case| case.name.contains(filter))
                .collect())
        }
    }

    /// Directory `{file:...}` paths fall back to
    pub fn base_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Load and validate one suite file
pub fn load_suite(path: &Path) -> Result<Suite> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read suite {}", path.display()))?;
    let mut suite: Suite = serde_yaml::from_str(&contents)
        .with_context(|| format!("Invalid suite {}", path.display()))?;
    suite.path = path.to_path_buf();
    suite.validate()?;
    Ok(suite)
}

/// Expand files, directories and glob patterns into a sorted list of suite files
pub fn discover_suites(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_file() {
            found.push(path.to_path_buf());
            continue;
        }

        let expanded = if path.is_dir() {
            format!("{}/**/*.yaml", pattern.trim_end_matches('/'))
        } else {
            pattern.clone()
        };

        let mut matched = 0;
        for entry in glob::glob(&expanded).with_context(|| format!("Invalid pattern '{}'", pattern))? {
            found.push(entry.with_context(|| format!("Failed to read match of '{}'", pattern))?);
            matched += 1;
        }
        if matched == 0 {
            return Err(anyhow!("No suites found for '{}'", pattern));
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}
