use crate::config::types::*;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            backend: match (self.backend, other.backend) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            cli: match (self.cli, other.cli) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            environment: match (self.environment, other.environment) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            normalize: self.normalize.merge(other.normalize),
            files: self.files.merge(other.files),
        }
    }
}

// Custom merge implementations for complex types
impl BackendInput {
    pub fn merge_with(self, other: BackendInput) -> BackendInput {
        BackendInput {
            kind: other.kind.or(self.kind),
            host: other.host.or(self.host),
            readiness: other.readiness.or(self.readiness),
            ready_line: other.ready_line.or(self.ready_line),
            startup_timeout_secs: other.startup_timeout_secs.or(self.startup_timeout_secs),
            stop_grace_secs: other.stop_grace_secs.or(self.stop_grace_secs),
            port_retries: other.port_retries.or(self.port_retries),
            local: match (self.local, other.local) {
                (Some(a), Some(b)) => Some(LocalBackendInput {
                    program: b.program.or(a.program),
                    args: b.args.or(a.args),
                }),
                (a, b) => b.or(a),
            },
            docker: match (self.docker, other.docker) {
                (Some(a), Some(b)) => Some(DockerBackendInput {
                    image: b.image.or(a.image),
                    container_name: b.container_name.or(a.container_name),
                    auto_cleanup: b.auto_cleanup.or(a.auto_cleanup),
                    environment: b.environment.or(a.environment),
                }),
                (a, b) => b.or(a),
            },
        }
    }
}

impl CliInput {
    pub fn merge_with(self, other: CliInput) -> CliInput {
        CliInput {
            executable: other.executable.or(self.executable),
            version_args: other.version_args.or(self.version_args),
            version_pattern: other.version_pattern.or(self.version_pattern),
            command_timeout_secs: other.command_timeout_secs.or(self.command_timeout_secs),
            working_dir: other.working_dir.or(self.working_dir),
        }
    }
}

impl EnvironmentInput {
    /// Variables from both sides are kept; `other` wins on conflicts
    pub fn merge_with(self, other: EnvironmentInput) -> EnvironmentInput {
        let variables = match (self.variables, other.variables) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a, b) => b.or(a),
        };

        EnvironmentInput {
            project: other.project.or(self.project),
            variables,
        }
    }
}
