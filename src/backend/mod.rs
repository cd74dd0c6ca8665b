//! Emulator lifecycle management.
//!
//! A [`BackendManager`] launches one emulator per call to [`BackendManager::start`],
//! either as a local child process or as a Docker container, and hands back a
//! [`BackendHandle`] that exclusively owns it. Handles that are dropped without
//! an explicit [`BackendManager::stop`] kill their emulator on the way out.

mod local;
mod probe;

pub use local::LocalProcess;
pub use probe::{probe_http, probe_tcp};

use crate::config::{Backend, BackendKind};
use crate::docker::{DockerManager, EmulatorContainer};
use crate::error::HarnessResult;
use std::fmt;
use tracing::{debug, info};

/// Lifecycle of a [`BackendHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Starting,
    Ready,
    Stopping,
    Stopped,
}

/// Where a running emulator can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendEndpoint {
    host: String,
    grpc_port: u16,
    rest_port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, grpc_port: u16, rest_port: u16) -> Self {
        Self {
            host: host.into(),
            grpc_port,
            rest_port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn rest_port(&self) -> u16 {
        self.rest_port
    }

    /// Base URL of the REST gateway, with a trailing slash
    pub fn rest_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.rest_port)
    }

    /// `host:port` of the gRPC server
    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (grpc {}, rest {})",
            self.host, self.grpc_port, self.rest_port
        )
    }
}

enum Launched {
    Local(LocalProcess),
    Docker(EmulatorContainer),
}

/// A running emulator owned by exactly one test
pub struct BackendHandle {
    id: String,
    endpoint: BackendEndpoint,
    state: BackendState,
    launched: Option<Launched>,
}

impl BackendHandle {
    /// Process id for local backends, container id for Docker backends
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// The emulator's process id, when it runs as a local child
    pub fn pid(&self) -> Option<u32> {
        match &self.launched {
            Some(Launched::Local(process)) => Some(process.pid()),
            _ => None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match &self.launched {
            Some(Launched::Docker(container)) => Some(container.id()),
            _ => None,
        }
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        // The launched value kills its emulator in its own Drop
        if self.launched.is_some() {
            debug!("Backend {} dropped without stop, killing it", self.id);
        }
    }
}

/// Starts and stops emulators for one resolved backend configuration
#[derive(Debug, Clone)]
pub struct BackendManager {
    config: Backend,
}

impl BackendManager {
    pub fn new(config: Backend) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Backend {
        &self.config
    }

    /// Launch an emulator on fresh ports and wait until it is ready.
    ///
    /// Fails with `StartupTimeout` when readiness is not reached in time and
    /// with `BackendCrashed` when the emulator exits first. Port-bind
    /// conflicts are retried on new ports.
    pub async fn start(&self) -> HarnessResult<BackendHandle> {
        debug!("Starting emulator backend ({:?})", BackendState::Starting);

        let (id, endpoint, launched) = match &self.config.kind {
            BackendKind::Local(local) => {
                let process = local::start(local, &self.config).await?;
                let endpoint = process.endpoint().clone();
                (process.pid().to_string(), endpoint, Launched::Local(process))
            }
            BackendKind::Docker(docker) => {
                let manager = DockerManager::new().await?;
                let container = manager.start_emulator(docker, &self.config).await?;
                let endpoint = container.endpoint().clone();
                (
                    container.id().to_string(),
                    endpoint,
                    Launched::Docker(container),
                )
            }
        };

        info!("Emulator ready at {}", endpoint);
        Ok(BackendHandle {
            id,
            endpoint,
            state: BackendState::Ready,
            launched: Some(launched),
        })
    }

    /// Stop the emulator behind `handle`.
    ///
    /// Sends a graceful termination first and force-kills after the grace
    /// period. Failures are logged and never returned.
    pub async fn stop(&self, handle: &mut BackendHandle) {
        let Some(launched) = handle.launched.take() else {
            handle.state = BackendState::Stopped;
            return;
        };

        handle.state = BackendState::Stopping;
        debug!("Stopping backend {}", handle.id);

        match launched {
            Launched::Local(process) => process.stop(self.config.stop_grace).await,
            Launched::Docker(container) => container.stop(self.config.stop_grace).await,
        }

        handle.state = BackendState::Stopped;
        info!("Emulator {} stopped", handle.id);
    }
}
