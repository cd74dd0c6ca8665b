//! Logical data-file resolution across build layouts.

use crate::error::{HarnessError, HarnessResult};
use itertools::Itertools;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maps logical paths such as `tests/common/descriptors.pb` to real files.
///
/// Lookup order: runfiles manifest entries, then each search root in the
/// order given. A path that resolves nowhere is an error, never retried.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    manifest: HashMap<String, PathBuf>,
    roots: Vec<PathBuf>,
}

impl FileResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            manifest: HashMap::new(),
            roots,
        }
    }

    /// Resolver seeded from `RUNFILES_MANIFEST_FILE` and `RUNFILES_DIR` when
    /// present, followed by `roots`.
    pub fn from_env(roots: Vec<PathBuf>) -> HarnessResult<Self> {
        let mut resolver = Self::default();

        if let Some(manifest) = std::env::var_os("RUNFILES_MANIFEST_FILE") {
            resolver = resolver.with_manifest(Path::new(&manifest))?;
        }
        if let Some(dir) = std::env::var_os("RUNFILES_DIR") {
            resolver.roots.push(PathBuf::from(dir));
        }
        resolver.roots.extend(roots);

        Ok(resolver)
    }

    /// Load a manifest of `<logical path> <real path>` lines
    pub fn with_manifest(mut self, manifest: &Path) -> HarnessResult<Self> {
        let contents = fs::read_to_string(manifest).map_err(|e| {
            HarnessError::io(
                format!("failed to read runfiles manifest {}", manifest.display()),
                e,
            )
        })?;

        for line in contents.lines() {
            if let Some((logical, real)) = line.split_once(' ') {
                self.manifest
                    .insert(logical.to_string(), PathBuf::from(real.trim()));
            }
        }
        debug!(
            "Loaded {} runfiles entries from {}",
            self.manifest.len(),
            manifest.display()
        );

        Ok(self)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn resolve(&self, logical: &str) -> HarnessResult<PathBuf> {
        let candidate = Path::new(logical);
        if candidate.is_absolute() {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
            return Err(self.unresolved(logical));
        }

        if let Some(real) = self.manifest.get(logical)
            && real.exists()
        {
            return Ok(real.clone());
        }

        self.roots
            .iter()
            .map(|root| root.join(candidate))
            .find(|path| path.exists())
            .ok_or_else(|| self.unresolved(logical))
    }

    fn unresolved(&self, logical: &str) -> HarnessError {
        let mut searched = self
            .roots
            .iter()
            .map(|root| root.display().to_string())
            .collect::<Vec<_>>();
        if !self.manifest.is_empty() {
            searched.insert(0, format!("manifest ({} entries)", self.manifest.len()));
        }
        HarnessError::UnresolvedFile {
            logical: logical.to_string(),
            searched: if searched.is_empty() {
                "nothing".to_string()
            } else {
                searched.iter().join(", ")
            },
        }
    }
}
