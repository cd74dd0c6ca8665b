//! Docker container management for emulator backends
//!
//! Starts the emulator image with its gRPC and REST ports published on
//! Docker-assigned loopback ports. Every container is tracked in a global
//! registry so the binary can remove leftovers on exit.

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::secret::{ContainerInspectResponse, HostConfig, PortBinding};
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::backend::{BackendEndpoint, probe_http, probe_tcp};
use crate::config::types::{Backend, DockerBackendConfig, Readiness};
use crate::constants::{
    CONTAINER_NAME_PREFIX, EMULATOR_GRPC_PORT, EMULATOR_REST_PORT, READINESS_POLL_INTERVAL,
};
use crate::error::{HarnessError, HarnessResult};

const LOOPBACK: &str = "127.0.0.1";

fn docker_error(context: &str, e: impl std::fmt::Display) -> HarnessError {
    HarnessError::Docker(format!("{}: {}", context, e))
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Docker connection used to run emulator containers
pub struct DockerManager {
    docker: Docker,
}

/// A running emulator container, removed on drop unless stopped first
pub struct EmulatorContainer {
    id: String,
    endpoint: BackendEndpoint,
    auto_cleanup: bool,
    armed: bool,
}

impl EmulatorContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// `docker stop` with `grace`, then remove the container
    pub async fn stop(mut self, grace: Duration) {
        self.armed = false;
        match DockerManager::new().await {
            Ok(manager) => {
                if let Err(e) = manager.stop_container(&self.id, grace, true).await {
                    warn!("Failed to stop emulator container {}: {}", self.id, e);
                }
            }
            Err(e) => warn!("Failed to connect to Docker to stop {}: {}", self.id, e),
        }
    }
}

impl Drop for EmulatorContainer {
    fn drop(&mut self) {
        if !self.armed || !self.auto_cleanup {
            return;
        }

        let container_id = self.id.clone();
        unregister_container(&container_id);

        // Drop may run inside a runtime that is shutting down, so cleanup gets its own
        let cleanup = std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    debug!("Failed to create runtime for cleanup: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                match DockerManager::new().await {
                    Ok(manager) => {
                        match manager
                            .stop_container(&container_id, Duration::ZERO, true)
                            .await
                        {
                            Ok(()) => debug!("Cleaned up emulator container: {}", container_id),
                            Err(e) => debug!(
                                "Failed to clean up emulator container {}: {}",
                                container_id, e
                            ),
                        }
                    }
                    Err(e) => debug!("Failed to create Docker manager for cleanup: {}", e),
                }
            });
        });

        let _ = cleanup.join();
    }
}

impl DockerManager {
    /// Connect to the Docker daemon, retrying briefly while it comes up
    pub async fn new() -> HarnessResult<Self> {
        const MAX_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 200;

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            match Self::try_connect().await {
                Ok(manager) => {
                    if attempt > 0 {
                        debug!("Connected to Docker after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES {
                        sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(HarnessError::Docker(format!(
            "failed to connect to Docker after {} attempts: {}. Make sure Docker is running or set DOCKER_HOST",
            MAX_RETRIES + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn try_connect() -> HarnessResult<Self> {
        for (description, socket_path) in Self::docker_socket_candidates() {
            match Self::try_socket_path(&socket_path).await {
                Ok(docker) => {
                    debug!("Using Docker via {} ({})", description, socket_path);
                    return Ok(Self { docker });
                }
                Err(e) => debug!("{} unavailable: {}", description, e),
            }
        }

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| docker_error("no usable Docker socket", e))?;
        docker
            .ping()
            .await
            .map_err(|e| docker_error("Docker daemon not responding", e))?;

        Ok(Self { docker })
    }

    /// Socket locations to try, most specific first
    fn docker_socket_candidates() -> Vec<(String, String)> {
        let mut candidates = Vec::new();

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            candidates.push(("DOCKER_HOST environment variable".to_string(), docker_host));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = std::env::var("HOME") {
                for (name, path) in [
                    ("macOS Docker Desktop", ".docker/run/docker.sock"),
                    ("Colima", ".colima/default/docker.sock"),
                    ("OrbStack", ".orbstack/run/docker.sock"),
                ] {
                    candidates.push((name.to_string(), format!("unix://{}/{}", home, path)));
                }
            }
        }

        candidates.push((
            "Standard Linux location".to_string(),
            "unix:///var/run/docker.sock".to_string(),
        ));

        candidates
    }

    async fn try_socket_path(socket_path: &str) -> HarnessResult<Docker> {
        let Some(socket_file) = socket_path.strip_prefix("unix://") else {
            return Err(HarnessError::Docker(format!(
                "unsupported socket protocol: {}",
                socket_path
            )));
        };

        let docker = Docker::connect_with_socket(socket_file, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| docker_error(&format!("failed to connect to {}", socket_path), e))?;
        docker
            .ping()
            .await
            .map_err(|e| docker_error(&format!("{} not responding", socket_path), e))?;

        Ok(docker)
    }

    /// Start an emulator container and wait until it is ready
    pub async fn start_emulator(
        &self,
        config: &DockerBackendConfig,
        backend: &Backend,
    ) -> HarnessResult<EmulatorContainer> {
        let container_name = config.container_name.clone().unwrap_or_else(|| {
            format!("{}_{}", CONTAINER_NAME_PREFIX, uuid::Uuid::new_v4().simple())
        });

        self.ensure_image_available(&config.image).await?;

        let env_vars = config
            .environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>();

        // No host_port: Docker picks a free one, so parallel runs never collide
        let mut port_bindings = HashMap::new();
        for port in [EMULATOR_GRPC_PORT, EMULATOR_REST_PORT] {
            port_bindings.insert(
                format!("{}/tcp", port),
                Some(vec![PortBinding {
                    host_ip: Some(LOOPBACK.to_string()),
                    host_port: None,
                }]),
            );
        }

        // auto_remove stays off so logs survive a crash
        let container_config = ContainerCreateBody {
            image: Some(config.image.clone()),
            env: Some(env_vars),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("🚀 Starting emulator container: {}", container_name);
        let create_options = CreateContainerOptions {
            name: Some(container_name.clone()),
            ..Default::default()
        };
        let container = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| docker_error("failed to create container", e))?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
        {
            let _ = self.remove_container(&container.id, true).await;
            return Err(docker_error("failed to start container", e));
        }

        if config.auto_cleanup {
            register_container(container.id.clone());
        }

        let endpoint = match self.published_endpoint(&container.id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.discard(&container.id).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .wait_until_ready(&container.id, &endpoint, backend)
            .await
        {
            self.discard(&container.id).await;
            return Err(e);
        }

        info!("Emulator container {} ready at {}", container_name, endpoint);
        Ok(EmulatorContainer {
            id: container.id,
            endpoint,
            auto_cleanup: config.auto_cleanup,
            armed: true,
        })
    }

    async fn discard(&self, container_id: &str) {
        let _ = self.remove_container(container_id, true).await;
        unregister_container(container_id);
    }

    async fn published_endpoint(&self, container_id: &str) -> HarnessResult<BackendEndpoint> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| docker_error("failed to inspect container", e))?;

        Ok(BackendEndpoint::new(
            LOOPBACK,
            extract_host_port(&inspect, EMULATOR_GRPC_PORT)?,
            extract_host_port(&inspect, EMULATOR_REST_PORT)?,
        ))
    }

    async fn wait_until_ready(
        &self,
        container_id: &str,
        endpoint: &BackendEndpoint,
        backend: &Backend,
    ) -> HarnessResult<()> {
        let deadline = Instant::now() + backend.startup_timeout;

        loop {
            let inspect = self
                .docker
                .inspect_container(container_id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| docker_error("failed to inspect container", e))?;

            if let Some(state) = &inspect.state
                && matches!(
                    state.status,
                    Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD)
                )
            {
                return Err(HarnessError::BackendCrashed {
                    status: format!("container exited with code {}", state.exit_code.unwrap_or(-1)),
                    stderr: self.fetch_container_logs(container_id).await,
                });
            }

            let ready = match &backend.readiness {
                Readiness::Http => probe_http(endpoint.host(), endpoint.rest_port()).await,
                Readiness::Tcp => probe_tcp(endpoint.host(), endpoint.rest_port()).await,
                Readiness::LogLine(_) => {
                    return Err(HarnessError::InvalidConfig(
                        "log-line readiness is not supported for Docker backends".to_string(),
                    ));
                }
            };
            if ready {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(HarnessError::StartupTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: backend.startup_timeout,
                });
            }
            sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// Stop a container, waiting up to `grace` before Docker kills it.
    /// A container that already exited is still removed when `remove` is set;
    /// one that no longer exists counts as stopped.
    pub async fn stop_container(
        &self,
        container_id: &str,
        grace: Duration,
        remove: bool,
    ) -> HarnessResult<()> {
        let options = StopContainerOptions {
            t: Some(grace.as_secs().min(i32::MAX as u64) as i32),
            ..Default::default()
        };
        let stop_result = self
            .docker
            .stop_container(container_id, Some(options))
            .await;

        unregister_container(container_id);

        match stop_result {
            Ok(()) if remove => self.remove_container(container_id, false).await,
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(_) if remove => self.remove_container(container_id, true).await,
            Err(e) => Err(docker_error("failed to stop container", e)),
        }
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> HarnessResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(docker_error("failed to remove container", e)),
        }
    }

    /// Last 50 log lines, or a placeholder when they cannot be fetched
    async fn fetch_container_logs(&self, container_id: &str) -> String {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail("50")
            .build();

        let log_stream = self.docker.logs(container_id, Some(options));

        match tokio::time::timeout(
            Duration::from_secs(3),
            log_stream.collect::<Vec<Result<LogOutput, _>>>(),
        )
        .await
        {
            Ok(results) => {
                let lines = results
                    .into_iter()
                    .filter_map(|r| r.ok())
                    .map(|output| output.to_string())
                    .collect::<Vec<_>>();
                if lines.is_empty() {
                    "(no logs available)".to_string()
                } else {
                    lines.join("")
                }
            }
            Err(_) => "(timed out fetching container logs)".to_string(),
        }
    }

    async fn ensure_image_available(&self, image: &str) -> HarnessResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling emulator image: {}", image);
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            result.map_err(|e| docker_error(&format!("failed to pull {}", image), e))?;
        }

        debug!("Pulled image: {}", image);
        Ok(())
    }
}

/// Host port Docker bound for `container_port`
fn extract_host_port(inspect: &ContainerInspectResponse, container_port: u16) -> HarnessResult<u16> {
    let key = format!("{}/tcp", container_port);
    let host_port = inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .and_then(|ports| ports.get(&key))
        .and_then(|bindings| bindings.as_ref())
        .and_then(|bindings| bindings.first())
        .and_then(|binding| binding.host_port.as_ref())
        .ok_or_else(|| HarnessError::Docker(format!("container has no host port for {}", key)))?;

    host_port
        .parse::<u16>()
        .map_err(|e| HarnessError::Docker(format!("invalid host port '{}': {}", host_port, e)))
}

/// Global registry for tracking active Docker containers
static CONTAINER_REGISTRY: Lazy<Arc<Mutex<Vec<String>>>> =
    Lazy::new(|| Arc::new(Mutex::new(Vec::new())));

pub fn register_container(container_id: String) {
    if let Ok(mut registry) = CONTAINER_REGISTRY.lock() {
        registry.push(container_id);
    }
}

pub fn unregister_container(container_id: &str) {
    if let Ok(mut registry) = CONTAINER_REGISTRY.lock() {
        registry.retain(|id| id != container_id);
    }
}

fn registered_containers() -> Vec<String> {
    CONTAINER_REGISTRY
        .lock()
        .map(|mut registry| std::mem::take(&mut *registry))
        .unwrap_or_default()
}

/// Remove every container still registered, e.g. after Ctrl-C
pub async fn cleanup_all_containers() {
    let container_ids = registered_containers();
    if container_ids.is_empty() {
        return;
    }

    info!(
        "Cleaning up {} registered container(s)",
        container_ids.len()
    );

    let cleanup_tasks = container_ids.into_iter().map(|id| {
        tokio::spawn(async move {
            match DockerManager::new().await {
                Ok(manager) => match manager.stop_container(&id, Duration::ZERO, true).await {
                    Ok(()) => debug!("Cleaned up container: {}", id),
                    Err(e) => warn!("Failed to clean up container {}: {}", id, e),
                },
                Err(e) => warn!("Failed to connect to Docker to clean up {}: {}", id, e),
            }
        })
    });

    const CLEANUP_TIMEOUT_SECS: u64 = 10;
    if tokio::time::timeout(
        Duration::from_secs(CLEANUP_TIMEOUT_SECS),
        futures_util::future::join_all(cleanup_tasks),
    )
    .await
    .is_err()
    {
        warn!(
            "Container cleanup timed out after {} seconds",
            CLEANUP_TIMEOUT_SECS
        );
    }
}
