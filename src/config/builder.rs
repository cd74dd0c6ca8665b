use crate::config::{merge::Merge, types::*};
use anyhow::{Result, anyhow};
use std::time::Duration;

pub struct ConfigBuilder {
    config_input: ConfigInput,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let defaults = Config::default();

        Ok(Config {
            backend: self.resolve_backend(&defaults.backend)?,
            cli: self.resolve_cli(&defaults.cli),
            environment: self.resolve_environment(&defaults.environment),
            normalize: self.resolve_normalize(&defaults.normalize),
            files: self.resolve_files(&defaults.files),
        })
    }

    fn resolve_backend(&self, defaults: &Backend) -> Result<Backend> {
        let backend_input = self.config_input.backend.as_ref();

        let kind_name = backend_input
            .and_then(|b| b.kind.as_ref())
            .cloned()
            .unwrap_or_else(|| "local".to_string());

        let kind = match kind_name.as_str() {
            "local" => {
                let local_defaults = LocalBackendConfig::default();
                let local_input = backend_input.and_then(|b| b.local.as_ref());
                BackendKind::Local(LocalBackendConfig {
                    program: local_input
                        .and_then(|l| l.program.as_ref())
                        .cloned()
                        .or_else(|| std::env::var("EMUCHECK_EMULATOR").ok())
                        .unwrap_or(local_defaults.program),
                    args: local_input
                        .and_then(|l| l.args.as_ref())
                        .cloned()
                        .unwrap_or(local_defaults.args),
                })
            }
            "docker" => {
                let docker_defaults = DockerBackendConfig::default();
                let docker_input = backend_input.and_then(|b| b.docker.as_ref());
                BackendKind::Docker(DockerBackendConfig {
                    image: docker_input
                        .and_then(|d| d.image.as_ref())
                        .cloned()
                        .unwrap_or(docker_defaults.image),
                    container_name: docker_input.and_then(|d| d.container_name.clone()),
                    auto_cleanup: docker_input
                        .and_then(|d| d.auto_cleanup)
                        .unwrap_or(docker_defaults.auto_cleanup),
                    environment: docker_input
                        .and_then(|d| d.environment.as_ref())
                        .cloned()
                        .unwrap_or(docker_defaults.environment),
                })
            }
            other => {
                return Err(anyhow!(
                    "Unknown backend kind '{}'. Expected 'local' or 'docker'",
                    other
                ));
            }
        };

        let ready_line = backend_input.and_then(|b| b.ready_line.as_ref()).cloned();
        let readiness = match backend_input.and_then(|b| b.readiness.as_deref()) {
            None => match ready_line {
                // A ready line on its own implies log-line readiness
                Some(line) => Readiness::LogLine(line),
                None => defaults.readiness.clone(),
            },
            Some("http") => Readiness::Http,
            Some("tcp") => Readiness::Tcp,
            Some("log_line") => Readiness::LogLine(ready_line.ok_or_else(|| {
                anyhow!("backend.readiness is 'log_line' but backend.ready_line is not set")
            })?),
            Some(other) => {
                return Err(anyhow!(
                    "Unknown readiness probe '{}'. Expected 'http', 'tcp' or 'log_line'",
                    other
                ));
            }
        };

        if matches!(kind, BackendKind::Docker(_)) && matches!(readiness, Readiness::LogLine(_)) {
            return Err(anyhow!(
                "Log-line readiness is only supported by the local backend"
            ));
        }

        Ok(Backend {
            kind,
            host: backend_input
                .and_then(|b| b.host.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.host.clone()),
            readiness,
            startup_timeout: backend_input
                .and_then(|b| b.startup_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.startup_timeout),
            stop_grace: backend_input
                .and_then(|b| b.stop_grace_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace),
            port_retries: backend_input
                .and_then(|b| b.port_retries)
                .unwrap_or(defaults.port_retries),
        })
    }

    fn resolve_cli(&self, defaults: &Cli) -> Cli {
        let cli_input = self.config_input.cli.as_ref();

        Cli {
            executable: cli_input
                .and_then(|c| c.executable.as_ref())
                .cloned()
                .or_else(|| std::env::var("EMUCHECK_CLI").ok())
                .unwrap_or_else(|| defaults.executable.clone()),
            version_args: cli_input
                .and_then(|c| c.version_args.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.version_args.clone()),
            version_pattern: cli_input
                .and_then(|c| c.version_pattern.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.version_pattern.clone()),
            command_timeout: cli_input
                .and_then(|c| c.command_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
            working_dir: cli_input
                .and_then(|c| c.working_dir.as_ref())
                .cloned()
                .or_else(|| defaults.working_dir.clone()),
        }
    }

    fn resolve_environment(&self, defaults: &Environment) -> Environment {
        let env_input = self.config_input.environment.as_ref();

        Environment {
            project: env_input
                .and_then(|e| e.project.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.project.clone()),
            variables: env_input
                .and_then(|e| e.variables.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.variables.clone()),
        }
    }

    fn resolve_normalize(&self, defaults: &Normalize) -> Normalize {
        let normalize_input = self.config_input.normalize.as_ref();

        Normalize {
            trim_trailing_whitespace: normalize_input
                .and_then(|n| n.trim_trailing_whitespace)
                .unwrap_or(defaults.trim_trailing_whitespace),
            volatile: normalize_input
                .and_then(|n| n.volatile.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.volatile.clone()),
        }
    }

    fn resolve_files(&self, defaults: &Files) -> Files {
        Files {
            search_roots: self
                .config_input
                .files
                .as_ref()
                .and_then(|f| f.search_roots.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.search_roots.clone()),
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
