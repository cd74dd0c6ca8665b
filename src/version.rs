//! CLI version detection and version-keyed expectation tables.

use crate::error::{HarnessError, HarnessResult};
use crate::runner::{self, CommandInvocation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// The CLI's major build number, used only as a branch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionThreshold(pub u32);

impl fmt::Display for VersionThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Detected versions, keyed by executable and version arguments.
/// Held across detection so each CLI is queried once per process.
static VERSION_CACHE: Lazy<Mutex<HashMap<(PathBuf, Vec<String>), VersionThreshold>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone)]
pub struct VersionGate {
    executable: PathBuf,
    args: Vec<String>,
    pattern: Regex,
    timeout: Duration,
}

impl VersionGate {
    /// `pattern` must have one capture group holding the build number.
    pub fn new(
        executable: impl Into<PathBuf>,
        args: Vec<String>,
        pattern: &str,
        timeout: Duration,
    ) -> HarnessResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            HarnessError::InvalidConfig(format!("version pattern '{}': {}", pattern, e))
        })?;
        if pattern.captures_len() < 2 {
            return Err(HarnessError::InvalidConfig(format!(
                "version pattern '{}' has no capture group",
                pattern
            )));
        }

        Ok(Self {
            executable: executable.into(),
            args,
            pattern,
            timeout,
        })
    }

    fn invocation(&self) -> CommandInvocation {
        CommandInvocation::new(self.executable.clone())
            .args(self.args.iter().cloned())
            .timeout(self.timeout)
    }

    /// Extract the build number from version command output
    pub fn parse_version(&self, output: &str) -> Option<VersionThreshold> {
        self.pattern
            .captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .map(VersionThreshold)
    }

    /// Detect the installed CLI's version, querying it at most once per process.
    ///
    /// Failures are not cached and never fall back to a default.
    pub async fn detect_version(&self) -> HarnessResult<VersionThreshold> {
        let key = (self.executable.clone(), self.args.clone());
        let mut cache = VERSION_CACHE.lock().await;
        if let Some(version) = cache.get(&key) {
            return Ok(*version);
        }

        let invocation = self.invocation();
        let command = invocation.display();
        let result = runner::run(&invocation)
            .await
            .map_err(|e| HarnessError::VersionUndetectable {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !result.success() {
            return Err(HarnessError::VersionUndetectable {
                command,
                reason: format!(
                    "exited with {}: {}",
                    crate::error::describe_exit(result.exit_code),
                    result.stderr.trim()
                ),
            });
        }

        // Some CLIs print their version banner on stderr
        let version = self
            .parse_version(&result.stdout)
            .or_else(|| self.parse_version(&result.stderr))
            .ok_or_else(|| HarnessError::VersionUndetectable {
                command: command.clone(),
                reason: format!("no match for pattern '{}'", self.pattern),
            })?;

        debug!("Detected CLI version {} from `{}`", version, command);
        cache.insert(key, version);
        Ok(version)
    }
}

/// Upper bound of one branch in a [`VersionBranches`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// `version < n`
    Below(u32),
    /// `version <= n`
    AtMost(u32),
}

impl Boundary {
    pub fn contains(&self, version: VersionThreshold) -> bool {
        u64::from(version.0) < self.exclusive_upper()
    }

    fn exclusive_upper(&self) -> u64 {
        match self {
            Boundary::Below(n) => u64::from(*n),
            Boundary::AtMost(n) => u64::from(*n) + 1,
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Below(n) => write!(f, "< {}", n),
            Boundary::AtMost(n) => write!(f, "<= {}", n),
        }
    }
}

/// Ordered `(boundary, value)` table with a catch-all.
///
/// Boundaries must strictly ascend, so every version selects exactly one
/// entry: the first whose boundary contains it, else the fallback.
#[derive(Debug, Clone)]
pub struct VersionBranches<T> {
    branches: Vec<(Boundary, T)>,
    otherwise: T,
}

impl<T> VersionBranches<T> {
    pub fn new(branches: Vec<(Boundary, T)>, otherwise: T) -> HarnessResult<Self> {
        for pair in branches.windows(2) {
            let (lower, upper) = (&pair[0].0, &pair[1].0);
            if lower.exclusive_upper() >= upper.exclusive_upper() {
                return Err(HarnessError::InvalidBranches(format!(
                    "branch '{}' is not above branch '{}'",
                    upper, lower
                )));
            }
        }
        Ok(Self {
            branches,
            otherwise,
        })
    }

    /// Single-entry table
    pub fn always(value: T) -> Self {
        Self {
            branches: Vec::new(),
            otherwise: value,
        }
    }

    pub fn select(&self, version: VersionThreshold) -> &T {
        self.branches
            .iter()
            .find(|(boundary, _)| boundary.contains(version))
            .map(|(_, value)| value)
            .unwrap_or(&self.otherwise)
    }

    pub fn branches(&self) -> &[(Boundary, T)] {
        &self.branches
    }

    pub fn fallback(&self) -> &T {
        &self.otherwise
    }
}
