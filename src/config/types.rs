use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Raw configuration input - all fields Optional for merging
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub backend: Option<BackendInput>,
    pub cli: Option<CliInput>,
    pub environment: Option<EnvironmentInput>,
    pub normalize: Option<NormalizeInput>,
    pub files: Option<FilesInput>,
}

/// Resolved configuration with all defaults applied
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub backend: Backend,
    pub cli: Cli,
    pub environment: Environment,
    pub normalize: Normalize,
    pub files: Files,
}

// Backend configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendInput {
    /// "local" or "docker"
    pub kind: Option<String>,
    pub host: Option<String>,
    /// "http", "tcp" or "log_line"
    pub readiness: Option<String>,
    pub ready_line: Option<String>,
    pub startup_timeout_secs: Option<u64>,
    pub stop_grace_secs: Option<u64>,
    pub port_retries: Option<u32>,
    pub local: Option<LocalBackendInput>,
    pub docker: Option<DockerBackendInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocalBackendInput {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DockerBackendInput {
    pub image: Option<String>,
    pub container_name: Option<String>,
    pub auto_cleanup: Option<bool>,
    pub environment: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub host: String,
    pub readiness: Readiness,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub port_retries: u32,
}

#[derive(Debug, Clone)]
pub enum BackendKind {
    Local(LocalBackendConfig),
    Docker(DockerBackendConfig),
}

/// How the backend manager decides the emulator is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Send a request to the REST port and wait for any response
    Http,
    /// Wait until the REST port accepts connections
    Tcp,
    /// Wait for a line containing this text on the emulator's output
    LogLine(String),
}

/// Emulator started as a child process.
///
/// `args` may contain `{host}`, `{grpc_port}` and `{rest_port}` placeholders.
#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DockerBackendConfig {
    pub image: String,
    pub container_name: Option<String>,
    pub auto_cleanup: bool,
    pub environment: HashMap<String, String>,
}

// CLI-under-test configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliInput {
    pub executable: Option<String>,
    pub version_args: Option<Vec<String>>,
    pub version_pattern: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Cli {
    pub executable: String,
    pub version_args: Vec<String>,
    pub version_pattern: String,
    pub command_timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

// Environment overlay configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvironmentInput {
    pub project: Option<String>,
    pub variables: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub project: String,
    pub variables: BTreeMap<String, String>,
}

// Output normalization configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NormalizeInput {
    pub trim_trailing_whitespace: Option<bool>,
    pub volatile: Option<Vec<VolatileRuleInput>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolatileRuleInput {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Default)]
pub struct Normalize {
    pub trim_trailing_whitespace: bool,
    pub volatile: Vec<VolatileRuleInput>,
}

// Data file resolution
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilesInput {
    pub search_roots: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, Default)]
pub struct Files {
    pub search_roots: Vec<PathBuf>,
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct BackendArgs {
    #[arg(long, help = "Backend kind: local or docker")]
    pub backend: Option<String>,

    #[arg(long, help = "Emulator program for the local backend")]
    pub emulator_program: Option<String>,

    #[arg(
        long,
        help = "Emulator arguments for the local backend (shell-quoted, supports {host} {grpc_port} {rest_port})"
    )]
    pub emulator_args: Option<String>,

    #[arg(long, help = "Emulator image for the docker backend")]
    pub image: Option<String>,

    #[arg(long, help = "Seconds to wait for the emulator to become ready")]
    pub startup_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CliArgs {
    #[arg(long = "cli", help = "Path to the CLI under test")]
    pub executable: Option<String>,

    #[arg(long, help = "Seconds before a single CLI command is killed")]
    pub command_timeout: Option<u64>,

    #[arg(long, help = "Project id exposed to the CLI")]
    pub project: Option<String>,
}

// Conversion functions from CLI args to config input
impl TryFrom<BackendArgs> for BackendInput {
    type Error = anyhow::Error;

    fn try_from(args: BackendArgs) -> anyhow::Result<Self> {
        let local_args = args
            .emulator_args
            .as_deref()
            .map(shell_words::split)
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid --emulator-args: {}", e))?;

        let local = if args.emulator_program.is_some() || local_args.is_some() {
            Some(LocalBackendInput {
                program: args.emulator_program,
                args: local_args,
            })
        } else {
            None
        };

        let docker = args.image.map(|image| DockerBackendInput {
            image: Some(image),
            ..Default::default()
        });

        Ok(Self {
            kind: args.backend,
            startup_timeout_secs: args.startup_timeout,
            local,
            docker,
            ..Default::default()
        })
    }
}

impl From<CliArgs> for CliInput {
    fn from(args: CliArgs) -> Self {
        Self {
            executable: args.executable,
            command_timeout_secs: args.command_timeout,
            ..Default::default()
        }
    }
}

impl From<CliArgs> for EnvironmentInput {
    fn from(args: CliArgs) -> Self {
        Self {
            project: args.project,
            variables: None,
        }
    }
}

impl ConfigInput {
    /// Command-line overrides as a config layer
    pub fn from_args(backend: &BackendArgs, cli: &CliArgs) -> anyhow::Result<Self> {
        Ok(Self {
            backend: Some(BackendInput::try_from(backend.clone())?),
            cli: Some(cli.clone().into()),
            environment: Some(cli.clone().into()),
            normalize: None,
            files: None,
        })
    }
}

/// Fully populated input that resolves back to the same config
impl From<&Config> for ConfigInput {
    fn from(config: &Config) -> Self {
        let (kind, local, docker) = match &config.backend.kind {
            BackendKind::Local(local) => (
                "local",
                Some(LocalBackendInput {
                    program: Some(local.program.clone()),
                    args: Some(local.args.clone()),
                }),
                None,
            ),
            BackendKind::Docker(docker) => (
                "docker",
                None,
                Some(DockerBackendInput {
                    image: Some(docker.image.clone()),
                    container_name: docker.container_name.clone(),
                    auto_cleanup: Some(docker.auto_cleanup),
                    environment: Some(docker.environment.clone()),
                }),
            ),
        };
        let (readiness, ready_line) = match &config.backend.readiness {
            Readiness::Http => ("http", None),
            Readiness::Tcp => ("tcp", None),
            Readiness::LogLine(line) => ("log_line", Some(line.clone())),
        };

        Self {
            backend: Some(BackendInput {
                kind: Some(kind.to_string()),
                host: Some(config.backend.host.clone()),
                readiness: Some(readiness.to_string()),
                ready_line,
                startup_timeout_secs: Some(config.backend.startup_timeout.as_secs()),
                stop_grace_secs: Some(config.backend.stop_grace.as_secs()),
                port_retries: Some(config.backend.port_retries),
                local,
                docker,
            }),
            cli: Some(CliInput {
                executable: Some(config.cli.executable.clone()),
                version_args: Some(config.cli.version_args.clone()),
                version_pattern: Some(config.cli.version_pattern.clone()),
                command_timeout_secs: Some(config.cli.command_timeout.as_secs()),
                working_dir: config.cli.working_dir.clone(),
            }),
            environment: Some(EnvironmentInput {
                project: Some(config.environment.project.clone()),
                variables: Some(config.environment.variables.clone()),
            }),
            normalize: Some(NormalizeInput {
                trim_trailing_whitespace: Some(config.normalize.trim_trailing_whitespace),
                volatile: Some(config.normalize.volatile.clone()),
            }),
            files: Some(FilesInput {
                search_roots: Some(config.files.search_roots.clone()),
            }),
        }
    }
}

impl Config {
    /// Interpret relative paths from the config file against `root`
    pub fn anchored_at(mut self, root: &std::path::Path) -> Self {
        self.files.search_roots = self
            .files
            .search_roots
            .iter()
            .map(|path| root.join(path))
            .collect();
        self.cli.working_dir = self.cli.working_dir.map(|dir| root.join(dir));
        self
    }
}
