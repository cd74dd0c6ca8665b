//! Subprocess execution for CLI invocations.

use crate::constants::DEFAULT_COMMAND_TIMEOUT;
use crate::environment::EnvironmentOverlay;
use crate::error::{HarnessError, HarnessResult};
use crate::process::{Signal, signal_group};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// One CLI call. Built once and never mutated after it is handed to [`run`].
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    program: PathBuf,
    args: Vec<String>,
    env: EnvironmentOverlay,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: EnvironmentOverlay::default(),
            working_dir: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, overlay: EnvironmentOverlay) -> Self {
        self.env = overlay;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Arguments that do not start with a dash, in order
    pub fn positional(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with('-'))
    }

    /// Arguments that start with a dash, in order
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|arg| arg.starts_with('-'))
    }

    pub fn overlay(&self) -> &EnvironmentOverlay {
        &self.env
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Shell-quoted command line, for failure reports
    pub fn display(&self) -> String {
        let mut words = vec![self.program.to_string_lossy().into_owned()];
        words.extend(self.args.iter().cloned());
        shell_words::join(words)
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `invocation` to completion or until its timeout expires.
///
/// The exit code is reported as-is; callers decide what a non-zero code means.
/// On timeout the child's whole process group is killed before returning
/// [`HarnessError::CommandTimeout`].
pub async fn run(invocation: &CommandInvocation) -> HarnessResult<CommandResult> {
    let shown = invocation.display();
    debug!("Running: {}", shown);

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
        program: invocation.program.to_string_lossy().into_owned(),
        source,
    })?;
    let pid = child.id();

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    // Pipes are drained concurrently with the wait so a chatty child never blocks.
    // The buffers outlive the timeout, so a killed command still reports what it wrote.
    let completion = tokio::time::timeout(invocation.timeout, async {
        let (status, out, err) = tokio::join!(
            child.wait(),
            drain(stdout_pipe, &mut stdout),
            drain(stderr_pipe, &mut stderr)
        );
        out?;
        err?;
        status
    })
    .await;

    match completion {
        Ok(Ok(status)) => {
            let result = CommandResult {
                stdout: lossy(stdout),
                stderr: lossy(stderr),
                exit_code: status.code(),
                duration: started.elapsed(),
            };
            debug!(
                "Finished in {:?} with {}",
                result.duration,
                crate::error::describe_exit(result.exit_code)
            );
            Ok(result)
        }
        Ok(Err(source)) => {
            terminate_tree(pid, &mut child).await;
            Err(HarnessError::io(
                format!("failed to collect output of `{}`", shown),
                source,
            ))
        }
        Err(_) => {
            warn!(
                "Command exceeded {:?}, killing process tree: {}",
                invocation.timeout, shown
            );
            terminate_tree(pid, &mut child).await;
            Err(HarnessError::CommandTimeout {
                command: shown,
                timeout: invocation.timeout,
                stdout: lossy(stdout),
                stderr: lossy(stderr),
            })
        }
    }
}

async fn terminate_tree(pid: Option<u32>, child: &mut tokio::process::Child) {
    if let Some(pid) = pid {
        signal_group(pid, Signal::Kill);
    }
    // Reaps the direct child so no zombie is left behind
    let _ = child.kill().await;
}

/// Append everything `pipe` yields to `buffer`.
///
/// Reads chunk by chunk so bytes already read stay in `buffer` if the future is dropped.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buffer: &mut Vec<u8>) -> std::io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let read = pipe.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}
