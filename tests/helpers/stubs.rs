//! Shell-script stand-ins for the emulator and the CLI under test

use anyhow::{Context, Result};
use emucheck::config::{BackendKind, Config, LocalBackendConfig, Readiness};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Emulator that announces itself and then idles until signalled
pub const READY_EMULATOR: &str = r#"echo "emulator listening on $1:$2 (rest $3)"
echo ready
exec sleep 30
"#;

/// Emulator that dies before it is ready
pub const CRASHING_EMULATOR: &str = r#"echo "boom: cannot open data dir" >&2
exit 3
"#;

/// Emulator that never reports readiness
pub const SILENT_EMULATOR: &str = "exec sleep 30\n";

/// Emulator that loses the port race on its first launch only
pub const FLAKY_PORT_EMULATOR: &str = r#"marker="$(dirname "$0")/attempted"
if [ ! -f "$marker" ]; then
  touch "$marker"
  echo "bind 127.0.0.1:$2: Address already in use" >&2
  exit 1
fi
echo ready
exec sleep 30
"#;

/// Emulator that always loses the port race
pub const PORT_TAKEN_EMULATOR: &str = r#"echo "bind: Address already in use" >&2
exit 1
"#;

/// Emulator that starts with an empty store of its own, keyed by its REST port
pub const STATEFUL_EMULATOR: &str = r#"store="$(dirname "$0")/store/$3"
rm -rf "$store"
mkdir -p "$store"
echo ready
exec sleep 30
"#;

/// A scratch directory holding stub executables
pub struct StubDir {
    pub temp_dir: TempDir,
}

impl StubDir {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("emucheck-stubs-")
            .tempdir()
            .context("Failed to create stub directory")?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write an executable `/bin/sh` script
    pub fn write_script(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    /// A CLI reporting `version` as its build number.
    ///
    /// Subcommands:
    /// - `version` prints the banner and records the call in `version_calls`
    /// - `echo ARGS...` prints its arguments on one line
    /// - `lines ARGS...` prints each argument on its own line
    /// - `env NAME` prints an environment variable
    /// - `fail CODE MESSAGE` writes MESSAGE to stderr and exits with CODE
    /// - `warn MESSAGE ARGS...` writes MESSAGE to stderr and ARGS to stdout, exiting 0
    /// - `sleep SECS` sleeps
    /// - `crlf` prints two CRLF-terminated lines
    /// - `cat PATH` prints a file
    /// - `create NAME`, `delete NAME` and `list` manage resources in the store of
    ///   the [`STATEFUL_EMULATOR`] the endpoint override points at
    pub fn fake_cli(&self, version: u32) -> Result<PathBuf> {
        let script = format!(
            r#"case "$1" in
  version)
    echo call >> "$(dirname "$0")/version_calls"
    echo "Google Cloud SDK {version}.0.0"
    echo "beta 2024.01.01"
    ;;
  echo)
    shift
    echo "$*"
    ;;
  lines)
    shift
    for line in "$@"; do echo "$line"; done
    ;;
  env)
    printenv "$2"
    ;;
  fail)
    echo "$3" >&2
    exit "$2"
    ;;
  warn)
    echo "$2" >&2
    shift 2
    echo "$*"
    ;;
  sleep)
    sleep "$2"
    ;;
  crlf)
    printf 'first\r\nsecond\r\n'
    ;;
  cat)
    cat "$2"
    ;;
  create|delete|list)
    port="${{CLOUDSDK_API_ENDPOINT_OVERRIDES_SPANNER##*:}}"
    store="$(dirname "$0")/store/${{port%/}}"
    if [ ! -d "$store" ]; then
      echo "no emulator at $CLOUDSDK_API_ENDPOINT_OVERRIDES_SPANNER" >&2
      exit 1
    fi
    case "$1" in
      create) touch "$store/$2" ;;
      delete) rm "$store/$2" || exit 1 ;;
      list) ls "$store" ;;
    esac
    ;;
  *)
    echo "unknown command: $1" >&2
    exit 2
    ;;
esac
"#
        );
        self.write_script("gcloud", &script)
    }

    /// How many times the fake CLI was asked for its version
    pub fn version_calls(&self) -> usize {
        fs::read_to_string(self.path().join("version_calls"))
            .map(|calls| calls.lines().count())
            .unwrap_or(0)
    }
}

/// Configuration running `cli` against the stub `emulator`, ready on its log line
pub fn stub_config(cli: &Path, emulator: &Path) -> Config {
    let mut config = Config::default();
    config.backend.kind = BackendKind::Local(LocalBackendConfig {
        program: emulator.display().to_string(),
        args: vec![
            "{host}".to_string(),
            "{grpc_port}".to_string(),
            "{rest_port}".to_string(),
        ],
    });
    config.backend.readiness = Readiness::LogLine("ready".to_string());
    config.backend.startup_timeout = Duration::from_secs(10);
    config.backend.stop_grace = Duration::from_secs(2);
    config.cli.executable = cli.display().to_string();
    config.cli.command_timeout = Duration::from_secs(10);
    config
}

/// Stub directory with a fake CLI and a well-behaved emulator
pub fn standard_stubs(version: u32) -> Result<(StubDir, Config)> {
    let stubs = StubDir::new()?;
    let cli = stubs.fake_cli(version)?;
    let emulator = stubs.write_script("emulator", READY_EMULATOR)?;
    let config = stub_config(&cli, &emulator);
    Ok((stubs, config))
}

/// Stub directory with a fake CLI and an emulator that keeps resources
pub fn stateful_stubs(version: u32) -> Result<(StubDir, Config)> {
    let stubs = StubDir::new()?;
    let cli = stubs.fake_cli(version)?;
    let emulator = stubs.write_script("emulator", STATEFUL_EMULATOR)?;
    let config = stub_config(&cli, &emulator);
    Ok((stubs, config))
}

/// Poll until `pid` has exited, for at most five seconds
pub async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..50 {
        if !emucheck::process::process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
