use crate::config::types::*;
use crate::constants::*;
use std::collections::{BTreeMap, HashMap};

impl Default for Backend {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local(LocalBackendConfig::default()),
            host: DEFAULT_HOST.to_string(),
            readiness: Readiness::Http,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            port_retries: DEFAULT_PORT_RETRIES,
        }
    }
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_EMULATOR_PROGRAM.to_string(),
            args: vec![
                "--hostname".to_string(),
                "{host}".to_string(),
                "--grpc_port".to_string(),
                "{grpc_port}".to_string(),
                "--http_port".to_string(),
                "{rest_port}".to_string(),
            ],
        }
    }
}

impl Default for DockerBackendConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_EMULATOR_IMAGE.to_string(),
            container_name: None,
            auto_cleanup: true,
            environment: HashMap::new(),
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            executable: DEFAULT_CLI.to_string(),
            version_args: vec!["version".to_string()],
            version_pattern: DEFAULT_VERSION_PATTERN.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            working_dir: None,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            variables: BTreeMap::new(),
        }
    }
}
