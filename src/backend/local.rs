//! Emulator launched as a local child process.

use super::BackendEndpoint;
use super::probe::{probe_http, probe_tcp};
use crate::config::{Backend, LocalBackendConfig, Readiness};
use crate::constants::{
    BIND_CONFLICT_MARKERS, MAX_CAPTURED_LINES, OUTPUT_DRAIN_TIMEOUT, READINESS_POLL_INTERVAL,
};
use crate::error::{HarnessError, HarnessResult, describe_exit};
use crate::process::{Signal, signal_group};
use std::collections::VecDeque;
use std::net::TcpListener;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

/// Tail of one output stream, plus whether the ready line has appeared on it
#[derive(Debug, Default)]
struct OutputCapture {
    lines: Mutex<VecDeque<String>>,
    marker_seen: AtomicBool,
}

impl OutputCapture {
    fn push(&self, line: String, marker: Option<&str>) {
        if marker.is_some_and(|m| line.contains(m)) {
            self.marker_seen.store(true, Ordering::SeqCst);
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == MAX_CAPTURED_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn text(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// A running local emulator. Killed on drop unless stopped first.
pub struct LocalProcess {
    child: Option<Child>,
    pid: u32,
    endpoint: BackendEndpoint,
    stdout: Arc<OutputCapture>,
    stderr: Arc<OutputCapture>,
    readers: Vec<JoinHandle<()>>,
}

impl LocalProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Captured stderr so far
    pub fn stderr(&self) -> String {
        self.stderr.text()
    }

    /// SIGTERM the process group, then SIGKILL once `grace` has passed.
    pub async fn stop(mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if !signal_group(self.pid, Signal::Terminate) {
            debug!("Emulator process group {} already gone", self.pid);
        }

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Emulator {} exited with {}", self.pid, describe_exit(status.code()));
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for emulator {}: {}", self.pid, e);
                self.force_kill(&mut child).await;
            }
            Err(_) => {
                warn!(
                    "Emulator {} ignored SIGTERM for {:?}, killing it",
                    self.pid, grace
                );
                self.force_kill(&mut child).await;
            }
        }
        // Grandchildren that outlived the leader
        signal_group(self.pid, Signal::Kill);

        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    async fn force_kill(&self, child: &mut Child) {
        signal_group(self.pid, Signal::Kill);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill emulator {}: {}", self.pid, e);
        }
    }

    /// Give the reader tasks a moment to collect what the process wrote before exiting
    async fn drain_output(&mut self) {
        let readers = std::mem::take(&mut self.readers);
        let _ = timeout(OUTPUT_DRAIN_TIMEOUT, futures_util::future::join_all(readers)).await;
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            signal_group(self.pid, Signal::Kill);
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

enum Attempt {
    Ready(LocalProcess),
    PortConflict(String),
}

/// Launch the emulator, retrying on fresh ports when it loses a bind race.
pub(super) async fn start(config: &LocalBackendConfig, backend: &Backend) -> HarnessResult<LocalProcess> {
    let deadline = Instant::now() + backend.startup_timeout;
    let mut attempt = 0;

    loop {
        match start_once(config, backend, deadline).await? {
            Attempt::Ready(process) => return Ok(process),
            Attempt::PortConflict(stderr) => {
                if attempt >= backend.port_retries {
                    return Err(HarnessError::BackendCrashed {
                        status: format!("port conflict after {} retries", attempt),
                        stderr,
                    });
                }
                attempt += 1;
                warn!(
                    "Emulator lost a port race, retrying on new ports ({}/{})",
                    attempt, backend.port_retries
                );
            }
        }
    }
}

async fn start_once(
    config: &LocalBackendConfig,
    backend: &Backend,
    deadline: Instant,
) -> HarnessResult<Attempt> {
    let (grpc_port, rest_port) = allocate_ports(&backend.host)?;
    let endpoint = BackendEndpoint::new(backend.host.clone(), grpc_port, rest_port);
    let args = substitute_args(&config.args, &endpoint);

    debug!("🚀 Launching {} {}", config.program, shell_words::join(&args));

    let mut command = Command::new(&config.program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
        program: config.program.clone(),
        source,
    })?;
    let pid = child.id().ok_or_else(|| HarnessError::BackendCrashed {
        status: "exited immediately".to_string(),
        stderr: String::new(),
    })?;

    let marker = match &backend.readiness {
        Readiness::LogLine(line) => Some(line.clone()),
        _ => None,
    };
    let stdout = Arc::new(OutputCapture::default());
    let stderr = Arc::new(OutputCapture::default());
    let readers = vec![
        spawn_reader(child.stdout.take(), stdout.clone(), marker.clone()),
        spawn_reader(child.stderr.take(), stderr.clone(), marker),
    ];

    let mut process = LocalProcess {
        child: Some(child),
        pid,
        endpoint,
        stdout,
        stderr,
        readers,
    };

    loop {
        let exited = match process.child.as_mut() {
            Some(child) => child
                .try_wait()
                .map_err(|e| HarnessError::io("failed to poll emulator", e))?,
            None => None,
        };

        if let Some(status) = exited {
            process.child = None;
            signal_group(process.pid, Signal::Kill);
            process.drain_output().await;
            let stderr = process.stderr();
            if is_port_conflict(&stderr) {
                return Ok(Attempt::PortConflict(stderr));
            }
            return Err(HarnessError::BackendCrashed {
                status: describe_exit(status.code()),
                stderr,
            });
        }

        if is_ready(&process, &backend.readiness).await {
            return Ok(Attempt::Ready(process));
        }

        if Instant::now() >= deadline {
            let endpoint = process.endpoint.to_string();
            warn!("Emulator at {} not ready in time, killing it", endpoint);
            process.stop(Duration::ZERO).await;
            return Err(HarnessError::StartupTimeout {
                endpoint,
                timeout: backend.startup_timeout,
            });
        }

        sleep(READINESS_POLL_INTERVAL).await;
    }
}

async fn is_ready(process: &LocalProcess, readiness: &Readiness) -> bool {
    let endpoint = &process.endpoint;
    match readiness {
        Readiness::Http => probe_http(endpoint.host(), endpoint.rest_port()).await,
        Readiness::Tcp => probe_tcp(endpoint.host(), endpoint.rest_port()).await,
        Readiness::LogLine(_) => {
            process.stdout.marker_seen.load(Ordering::SeqCst)
                || process.stderr.marker_seen.load(Ordering::SeqCst)
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>, capture: Arc<OutputCapture>, marker: Option<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(pipe) = pipe else {
            return;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "emucheck::emulator", "{}", line);
            capture.push(line, marker.as_deref());
        }
    })
}

/// Two distinct free ports on `host`, gRPC first.
///
/// Both listeners are held until both ports are known so the OS cannot hand
/// out the same port twice.
fn allocate_ports(host: &str) -> HarnessResult<(u16, u16)> {
    let bind = || {
        TcpListener::bind((host, 0))
            .map_err(|e| HarnessError::io(format!("failed to reserve a port on {}", host), e))
    };
    let grpc = bind()?;
    let rest = bind()?;

    let port = |listener: &TcpListener| {
        listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|e| HarnessError::io("failed to read reserved port", e))
    };
    Ok((port(&grpc)?, port(&rest)?))
}

fn substitute_args(template: &[String], endpoint: &BackendEndpoint) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{host}", endpoint.host())
                .replace("{grpc_port}", &endpoint.grpc_port().to_string())
                .replace("{rest_port}", &endpoint.rest_port().to_string())
        })
        .collect()
}

fn is_port_conflict(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    BIND_CONFLICT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
