//! Per-test orchestration: one backend, one overlay, sequential CLI calls.
//!
//! ```no_run
//! use emucheck::{Config, join_lines, with_test_case};
//!
//! # async fn example(config: Config) -> emucheck::HarnessResult<()> {
//! with_test_case("list_empty", &config, async |case| {
//!     case.run(["spanner", "instances", "create", "test-instance", "--config=emulator-config",
//!               "--description=Test Instance", "--nodes=3"]).await?;
//!     case.assert_output(
//!         ["spanner", "databases", "list", "--instance=test-instance"],
//!         &join_lines(&[""]),
//!     )
//!     .await
//! })
//! .await
//! # }
//! ```

use crate::backend::{BackendEndpoint, BackendHandle, BackendManager};
use crate::config::{Cli, Config};
use crate::environment::{EnvironmentBinder, EnvironmentOverlay};
use crate::error::{HarnessError, HarnessResult};
use crate::normalize::{ExpectedOutput, Normalizer, VolatileRule, render_diff};
use crate::resolve::FileResolver;
use crate::runner::{self, CommandInvocation, CommandResult};
use crate::version::{VersionBranches, VersionGate, VersionThreshold};
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Where a [`TestCase`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCaseState {
    Idle,
    BackendStarting,
    Ready,
    Running,
    TearingDown,
}

pub struct TestCase {
    name: String,
    state: TestCaseState,
    manager: BackendManager,
    backend: Option<BackendHandle>,
    cli_config_dir: Option<TempDir>,
    overlay: EnvironmentOverlay,
    cli: Cli,
    normalizer: Normalizer,
    resolver: FileResolver,
    version_gate: VersionGate,
    failed: bool,
}

impl TestCase {
    /// Start a fresh backend for `name` and bind the CLI environment to it
    pub async fn start(name: impl Into<String>, config: &Config) -> HarnessResult<Self> {
        let resolver = FileResolver::from_env(config.files.search_roots.clone())?;
        Self::start_with_resolver(name, config, resolver).await
    }

    pub async fn start_with_resolver(
        name: impl Into<String>,
        config: &Config,
        resolver: FileResolver,
    ) -> HarnessResult<Self> {
        let name = name.into();

        let mut normalizer =
            Normalizer::new().trim_trailing_whitespace(config.normalize.trim_trailing_whitespace);
        for rule in &config.normalize.volatile {
            normalizer = normalizer.with_rule(VolatileRule::new(&rule.pattern, &rule.replacement)?)?;
        }

        let version_gate = VersionGate::new(
            &config.cli.executable,
            config.cli.version_args.clone(),
            &config.cli.version_pattern,
            config.cli.command_timeout,
        )?;

        let mut case = Self {
            name,
            state: TestCaseState::Idle,
            manager: BackendManager::new(config.backend.clone()),
            backend: None,
            cli_config_dir: None,
            overlay: EnvironmentOverlay::default(),
            cli: config.cli.clone(),
            normalizer,
            resolver,
            version_gate,
            failed: false,
        };

        debug!("[{}] starting backend", case.name);
        case.state = TestCaseState::BackendStarting;
        let backend = case.manager.start().await?;

        let cli_config_dir = tempfile::Builder::new()
            .prefix("emucheck-cli-")
            .tempdir()
            .map_err(|e| HarnessError::io("failed to create CLI config directory", e))?;

        case.overlay = EnvironmentBinder::new(config.environment.project.clone())
            .with_extra(config.environment.variables.clone())
            .bind(backend.endpoint(), cli_config_dir.path());
        case.backend = Some(backend);
        case.cli_config_dir = Some(cli_config_dir);
        case.state = TestCaseState::Ready;

        Ok(case)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TestCaseState {
        self.state
    }

    pub fn backend(&self) -> Option<&BackendHandle> {
        self.backend.as_ref()
    }

    pub fn endpoint(&self) -> Option<&BackendEndpoint> {
        self.backend.as_ref().map(BackendHandle::endpoint)
    }

    pub fn overlay(&self) -> &EnvironmentOverlay {
        &self.overlay
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// The full shell-quoted command line `args` would run
    pub fn command_line(&self, args: &[String]) -> String {
        self.invocation(args.iter().cloned()).display()
    }

    fn invocation<I, S>(&self, args: I) -> CommandInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut invocation = CommandInvocation::new(&self.cli.executable)
            .args(args)
            .env(self.overlay.clone())
            .timeout(self.cli.command_timeout);
        if let Some(dir) = &self.cli.working_dir {
            invocation = invocation.current_dir(dir);
        }
        invocation
    }

    /// Run one CLI command and return its raw result, whatever the exit code.
    pub async fn run_command<I, S>(&mut self, args: I) -> HarnessResult<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(args);
        if self.failed {
            return Err(HarnessError::PriorCommandFailed {
                command: invocation.display(),
            });
        }

        self.state = TestCaseState::Running;
        let result = runner::run(&invocation).await;
        self.state = TestCaseState::Ready;

        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Run a command that must exit 0 and return its normalized stdout
    pub async fn run<I, S>(&mut self, args: I) -> HarnessResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = collect_args(args);
        let result = self.run_expecting_exit(args, 0).await?;
        Ok(self.normalizer.normalize(&result.stdout))
    }

    /// Run a command that must exit non-zero
    pub async fn run_expecting_failure<I, S>(&mut self, args: I) -> HarnessResult<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = collect_args(args);
        let command = self.invocation(args.iter().cloned()).display();
        let result = self.run_command(args).await?;

        if result.success() {
            self.failed = true;
            return Err(HarnessError::UnexpectedExitCode {
                command,
                expected: None,
                actual: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Run a command that must exit with exactly `code`
    pub async fn run_expecting_exit<I, S>(&mut self, args: I, code: i32) -> HarnessResult<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = collect_args(args);
        let command = self.invocation(args.iter().cloned()).display();
        let result = self.run_command(args).await?;

        if result.exit_code != Some(code) {
            self.failed = true;
            return Err(HarnessError::UnexpectedExitCode {
                command,
                expected: Some(code),
                actual: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Run a command and compare its normalized stdout with `expected`
    pub async fn assert_output<I, S>(&mut self, args: I, expected: &ExpectedOutput) -> HarnessResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = collect_args(args);
        let command = self.invocation(args.iter().cloned()).display();
        let result = self.run_expecting_exit(args, 0).await?;
        let actual = self.normalizer.normalize(&result.stdout);
        self.check_output(&command, expected, &actual, &result.stderr)
    }

    /// Compare already-normalized `actual` text with `expected`.
    ///
    /// `stderr` is the command's raw stderr, carried into the failure report.
    pub fn check_output(
        &mut self,
        command: &str,
        expected: &ExpectedOutput,
        actual: &str,
        stderr: &str,
    ) -> HarnessResult<()> {
        let expected = self.normalizer.normalize(&expected.lines().join("\n"));
        if expected == actual {
            return Ok(());
        }

        self.failed = true;
        Err(HarnessError::UnexpectedOutput {
            command: command.to_string(),
            diff: render_diff(&expected, actual),
            expected,
            actual: actual.to_string(),
            stderr: stderr.to_string(),
        })
    }

    /// Block every later command in this case
    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn expected_output<I, S>(&self, lines: I) -> ExpectedOutput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExpectedOutput::from_lines(lines)
    }

    /// The installed CLI's version, detected once per process
    pub async fn cli_version(&self) -> HarnessResult<VersionThreshold> {
        self.version_gate.detect_version().await
    }

    /// Pick the entry of `branches` matching the installed CLI
    pub async fn select<'a, T>(&mut self, branches: &'a VersionBranches<T>) -> HarnessResult<&'a T> {
        match self.cli_version().await {
            Ok(version) => Ok(branches.select(version)),
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    pub fn resolve(&self, logical: &str) -> HarnessResult<PathBuf> {
        self.resolver.resolve(logical)
    }

    /// Stop the backend and remove the per-test CLI config directory
    pub async fn finish(mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.state = TestCaseState::TearingDown;

        if let Some(mut backend) = self.backend.take() {
            self.manager.stop(&mut backend).await;
        }
        if let Some(dir) = self.cli_config_dir.take()
            && let Err(e) = dir.close()
        {
            warn!("[{}] failed to remove CLI config directory: {}", self.name, e);
        }

        self.state = TestCaseState::Idle;
        info!("[{}] torn down", self.name);
    }
}

impl Drop for TestCase {
    fn drop(&mut self) {
        if self.backend.is_some() {
            warn!(
                "[{}] dropped without teardown; killing its backend",
                self.name
            );
        }
    }
}

fn collect_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

/// Run `body` against a fresh test case and always tear it down afterwards.
///
/// Teardown runs whether the body succeeds or fails; the body's result is
/// returned unchanged. If the body panics, the backend handle's `Drop` kills
/// the emulator.
pub async fn with_test_case<F, R>(name: &str, config: &Config, body: F) -> HarnessResult<R>
where
    F: AsyncFnOnce(&mut TestCase) -> HarnessResult<R>,
{
    let mut case = TestCase::start(name, config).await?;
    let outcome = body(&mut case).await;
    case.finish().await;
    outcome
}
