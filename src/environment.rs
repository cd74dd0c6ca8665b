//! Environment overlays that point the CLI under test at one backend.
//!
//! An overlay is a plain value handed to every invocation. Nothing here touches
//! the harness's own process environment, so tests running side by side each
//! see only their own endpoint.

use crate::backend::BackendEndpoint;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::path::Path;

/// Ordered set of environment variables applied on top of the inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvironmentOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Render as `export KEY='value'` lines for a POSIX shell
    pub fn to_shell_exports(&self) -> String {
        self.vars
            .iter()
            .map(|(key, value)| format!("export {}={}", key, shell_words::quote(value)))
            .join("\n")
    }
}

/// Builds the overlay for a running backend
#[derive(Debug, Clone)]
pub struct EnvironmentBinder {
    project: String,
    extra: BTreeMap<String, String>,
}

impl EnvironmentBinder {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            extra: BTreeMap::new(),
        }
    }

    /// User-supplied variables win over the computed ones
    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    /// `cli_config_dir` isolates the CLI's own configuration store per test.
    pub fn bind(&self, endpoint: &BackendEndpoint, cli_config_dir: &Path) -> EnvironmentOverlay {
        let mut overlay = EnvironmentOverlay::new()
            .with("CLOUDSDK_API_ENDPOINT_OVERRIDES_SPANNER", endpoint.rest_url())
            .with("SPANNER_EMULATOR_HOST", endpoint.grpc_address())
            .with("CLOUDSDK_AUTH_DISABLE_CREDENTIALS", "true")
            .with("CLOUDSDK_CORE_PROJECT", self.project.as_str())
            .with("CLOUDSDK_CORE_DISABLE_PROMPTS", "1")
            .with("CLOUDSDK_CONFIG", cli_config_dir.to_string_lossy());

        for (key, value) in &self.extra {
            overlay = overlay.with(key.as_str(), value.as_str());
        }

        overlay
    }
}
