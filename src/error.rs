//! Error taxonomy for the harness.
//!
//! Every failure a test can observe maps to one variant. Port-bind conflicts are
//! retried inside the backend manager and never surface here unless retries
//! run out; everything else propagates and fails the enclosing test.

use std::time::Duration;
use thiserror::Error;

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("emulator at {endpoint} did not become ready within {}", format_timeout(.timeout))]
    StartupTimeout { endpoint: String, timeout: Duration },

    #[error("emulator exited before becoming ready ({status})\n--- stderr ---\n{stderr}")]
    BackendCrashed { status: String, stderr: String },

    #[error(
        "command timed out after {}: {command}{}{}",
        format_timeout(.timeout),
        section("stdout", .stdout),
        section("stderr", .stderr)
    )]
    CommandTimeout {
        command: String,
        timeout: Duration,
        /// Output read before the process was killed
        stdout: String,
        stderr: String,
    },

    #[error("could not determine CLI version from `{command}`: {reason}")]
    VersionUndetectable { command: String, reason: String },

    #[error("unexpected output from `{command}`\n{diff}{}", section("stderr", .stderr))]
    UnexpectedOutput {
        command: String,
        expected: String,
        actual: String,
        diff: String,
        stderr: String,
    },

    #[error(
        "`{command}` exited with {} (expected {})\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
        describe_exit(*.actual),
        describe_expected_exit(*.expected)
    )]
    UnexpectedExitCode {
        command: String,
        expected: Option<i32>,
        actual: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("a previous command in this test failed; refusing to run `{command}`")]
    PriorCommandFailed { command: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("docker: {0}")]
    Docker(String),

    #[error("could not resolve data file `{logical}` (searched: {searched})")]
    UnresolvedFile { logical: String, searched: String },

    #[error("invalid version branches: {0}")]
    InvalidBranches(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable snake_case name of the variant, used in machine-readable reports
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::StartupTimeout { .. } => "startup_timeout",
            HarnessError::BackendCrashed { .. } => "backend_crashed",
            HarnessError::CommandTimeout { .. } => "command_timeout",
            HarnessError::VersionUndetectable { .. } => "version_undetectable",
            HarnessError::UnexpectedOutput { .. } => "unexpected_output",
            HarnessError::UnexpectedExitCode { .. } => "unexpected_exit_code",
            HarnessError::PriorCommandFailed { .. } => "prior_command_failed",
            HarnessError::Spawn { .. } => "spawn",
            HarnessError::Io { .. } => "io",
            HarnessError::Docker(_) => "docker",
            HarnessError::UnresolvedFile { .. } => "unresolved_file",
            HarnessError::InvalidBranches(_) => "invalid_branches",
            HarnessError::InvalidConfig(_) => "invalid_config",
        }
    }
}

fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Labelled block of captured output, empty when there is none
fn section(label: &str, text: &str) -> String {
    if text.is_empty() {
        String::new()
    } else {
        format!("\n--- {} ---\n{}", label, text.trim_end_matches('\n'))
    }
}

/// `None` means the process was terminated by a signal.
pub fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

fn describe_expected_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a non-zero exit code".to_string(),
    }
}
