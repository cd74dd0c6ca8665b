use crate::helpers::stubs::{READY_EMULATOR, StubDir};
use anyhow::Result;
use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary project directory with stub executables for driving the binary
pub struct CliTestHelper {
    pub temp_dir: TempDir,
    pub project_root: PathBuf,
    pub stubs: StubDir,
    pub cli_path: PathBuf,
    pub emulator_path: PathBuf,
}

impl CliTestHelper {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let project_root = temp_dir.path().to_path_buf();

        let stubs = StubDir::new()?;
        let cli_path = stubs.fake_cli(425)?;
        let emulator_path = stubs.write_script("emulator", READY_EMULATOR)?;

        Ok(Self {
            temp_dir,
            project_root,
            stubs,
            cli_path,
            emulator_path,
        })
    }

    /// Write an emucheck.yaml pointing at the stub CLI and emulator
    pub fn init_project(&self) -> Result<()> {
        let config = format!(
            r#"backend:
  kind: local
  ready_line: ready
  startup_timeout_secs: 10
  stop_grace_secs: 2
  local:
    program: {}
    args: ["{{host}}", "{{grpc_port}}", "{{rest_port}}"]

cli:
  executable: {}
  command_timeout_secs: 10

environment:
  project: test-project
"#,
            self.emulator_path.display(),
            self.cli_path.display()
        );
        fs::write(self.project_root.join("emucheck.yaml"), config)?;
        Ok(())
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.project_root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// The binary, run from the project root
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("emucheck").unwrap();
        cmd.current_dir(&self.project_root)
            .env_remove("EMUCHECK_CLI")
            .env_remove("EMUCHECK_EMULATOR")
            .env_remove("RUST_LOG");
        cmd
    }
}

/// Run a CLI test against a fresh project directory
///
/// # Example
/// ```
/// #[tokio::test]
/// async fn test_version() -> Result<()> {
///     with_cli_helper(async |helper| {
///         helper.init_project()?;
///         helper.command().arg("version").assert().success();
///         Ok(())
///     })
///     .await
/// }
/// ```
pub async fn with_cli_helper<F, R>(test_fn: F) -> R
where
    F: std::ops::AsyncFnOnce(&CliTestHelper) -> R,
{
    let helper = CliTestHelper::new().expect("Failed to set up CLI test project");
    test_fn(&helper).await
}
