use super::{Case, Step, Suite};
use crate::config::Config;
use crate::error::{HarnessError, HarnessResult};
use crate::harness::TestCase;
use crate::resolve::FileResolver;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

static FILE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{file:([^}]+)\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
}

impl CaseStatus {
    fn from_error(error: &HarnessError) -> Self {
        let diff = match error {
            HarnessError::UnexpectedOutput { diff, .. } => Some(diff.clone()),
            _ => None,
        };
        CaseStatus::Failed {
            kind: error.kind().to_string(),
            message: error.to_string(),
            diff,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: CaseStatus,
    /// Steps that ran to completion, setup included
    pub steps_passed: usize,
    pub duration_ms: u128,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteOutcome {
    pub suite: String,
    pub path: PathBuf,
    pub cases: Vec<CaseOutcome>,
}

impl SuiteOutcome {
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|case| case.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.cases.iter().map(|case| case.duration_ms as u64).sum())
    }
}

/// Runs suites case by case, each on a fresh backend
pub struct SuiteRunner {
    config: Config,
    filter: Option<String>,
}

impl SuiteRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Only run cases whose names match `filter`
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub async fn run_suite(&self, suite: &Suite) -> Result<SuiteOutcome> {
        let cases = suite.selected_cases(self.filter.as_deref())?;
        info!("Running suite '{}' ({} case(s))", suite.name, cases.len());

        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            outcomes.push(self.run_case(suite, case).await?);
        }

        Ok(SuiteOutcome {
            suite: suite.name.clone(),
            path: suite.path.clone(),
            cases: outcomes,
        })
    }

    async fn run_case(&self, suite: &Suite, case: &Case) -> Result<CaseOutcome> {
        let started = Instant::now();
        let resolver = FileResolver::from_env(self.config.files.search_roots.clone())?
            .with_root(suite.base_dir());

        let mut steps_passed = 0;
        let status = match TestCase::start_with_resolver(&case.name, &self.config, resolver).await {
            Ok(mut test_case) => {
                let mut status = CaseStatus::Passed;
                for step in suite.setup.iter().chain(&case.steps) {
                    match run_step(&mut test_case, step).await {
                        Ok(()) => steps_passed += 1,
                        Err(e) => {
                            debug!("[{}] step failed: {}", case.name, e);
                            status = CaseStatus::from_error(&e);
                            break;
                        }
                    }
                }
                test_case.finish().await;
                status
            }
            Err(e) => CaseStatus::from_error(&e),
        };

        Ok(CaseOutcome {
            name: case.name.clone(),
            status,
            steps_passed,
            duration_ms: started.elapsed().as_millis(),
        })
    }
}

/// Run one step: exit code, then stderr, then stdout
pub async fn run_step(case: &mut TestCase, step: &Step) -> HarnessResult<()> {
    let args = substitute_files(case, &step.args)?;
    let command = case.command_line(&args);
    let expectation = step.expectation()?;

    let result = case.run_expecting_exit(args, step.expected_exit()).await?;

    if let Some(needle) = &step.expect_stderr_contains
        && !result.stderr.contains(needle.as_str())
    {
        case.mark_failed();
        let actual = case.normalizer().normalize(&result.stderr);
        return Err(HarnessError::UnexpectedOutput {
            diff: format!("stderr does not contain {:?}", needle),
            command,
            expected: needle.clone(),
            actual,
            stderr: result.stderr,
        });
    }

    if let Some(branches) = expectation {
        let expected = case.select(&branches).await?;
        let actual = case.normalizer().normalize(&result.stdout);
        case.check_output(&command, expected, &actual, &result.stderr)?;
    }

    Ok(())
}

/// Replace `{file:<logical>}` in each argument with the resolved path
fn substitute_files(case: &TestCase, args: &[String]) -> HarnessResult<Vec<String>> {
    args.iter()
        .map(|arg| {
            let mut resolved = String::with_capacity(arg.len());
            let mut last = 0;
            for caps in FILE_PLACEHOLDER.captures_iter(arg) {
                let (Some(whole), Some(logical)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                resolved.push_str(&arg[last..whole.start()]);
                resolved.push_str(&case.resolve(logical.as_str())?.to_string_lossy());
                last = whole.end();
            }
            resolved.push_str(&arg[last..]);
            Ok(resolved)
        })
        .collect()
}
