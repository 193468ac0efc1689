//! The `spawn-cli` adapter: a local command-line model runner spoken to over newline-delimited
//! JSON on stdin/stdout, optionally wrapped in the [`crate::sandbox::Sandbox`] resource cap
//! when `docker_sandbox` is set. Grounded on the pack's `tokio::process::Command` +
//! `Stdio::piped()` + `kill_on_drop(true)` child-process idiom; there is no equivalent in the
//! teacher repo, which never shells out to a subprocess.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;

use crate::adapters::{AdapterResponse, AdapterRuntime, InvocationContext, NormalizedRequest};
use crate::error::AdapterError;
use crate::models::StreamChunk;
use crate::provider::AdapterConfig;
use crate::sandbox::{Sandbox, SandboxError};

const STDERR_RING_CAPACITY: usize = 16 * 1024;

/// `Sandbox::spawn`/`wait` already distinguish overload and timeout as their own
/// `SandboxError` variants; re-flatten those into the matching `AdapterError` cases instead of
/// burying them inside the generic `Sandbox(...)` wrapper.
fn map_sandbox_err(e: SandboxError) -> AdapterError {
    match e {
        SandboxError::Overloaded => AdapterError::Overloaded,
        SandboxError::Timeout => AdapterError::Timeout,
        other => AdapterError::Sandbox(other),
    }
}

pub struct SpawnCliAdapter {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    docker_sandbox: bool,
    sandbox_config: Option<crate::provider::SandboxConfig>,
    sandbox: Option<Sandbox>,
    /// Caps direct (non-sandboxed) spawns too, so an unsandboxed spawn-cli provider can't
    /// fork-bomb the gateway process.
    direct_semaphore: Arc<Semaphore>,
}

impl SpawnCliAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let AdapterConfig::SpawnCli {
            command,
            args,
            docker_sandbox,
            sandbox,
            timeout,
        } = config
        else {
            return Err(AdapterError::Configuration {
                message: "expected spawn-cli adapter config".to_string(),
            });
        };

        let sandbox_pool = if docker_sandbox {
            Some(Sandbox::new(4))
        } else {
            None
        };

        Ok(Self {
            command,
            args,
            timeout,
            docker_sandbox,
            sandbox_config: sandbox,
            sandbox: sandbox_pool,
            direct_semaphore: Arc::new(Semaphore::new(8)),
        })
    }

    async fn run(
        &self,
        ctx: &InvocationContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError> {
        if self.docker_sandbox {
            let sandbox = self.sandbox.as_ref().expect("sandbox pool configured");
            let mut child = sandbox
                .spawn(&self.command, &self.args, self.sandbox_config.as_ref())
                .await
                .map_err(map_sandbox_err)?;

            write_request(&mut child.stdin(), payload).await?;
            let line = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    child.terminate().await;
                    return Err(AdapterError::Cancelled);
                }
                r = read_one_line(&mut child.stdout(), &mut child.stderr()) => r?,
            };
            child.wait().await.map_err(map_sandbox_err)?;
            parse_line(&line)
        } else {
            let _permit = self
                .direct_semaphore
                .clone()
                .try_acquire_owned()
                .map_err(|_| AdapterError::Overloaded)?;

            let mut child = Command::new(&self.command)
                .args(&self.args)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AdapterError::Configuration {
                    message: format!("failed to spawn process: {e}"),
                })?;

            {
                let mut stdin = child.stdin.take().expect("stdin piped at spawn");
                write_request(&mut stdin, payload).await?;
            }
            let mut stdout = child.stdout.take().expect("stdout piped at spawn");
            let mut stderr = child.stderr.take().expect("stderr piped at spawn");

            let line = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    terminate_direct(&mut child).await;
                    return Err(AdapterError::Cancelled);
                }
                r = tokio::time::timeout(self.timeout, read_one_line(&mut stdout, &mut stderr)) => {
                    match r {
                        Ok(inner) => inner?,
                        Err(_) => {
                            terminate_direct(&mut child).await;
                            return Err(AdapterError::Timeout);
                        }
                    }
                }
            };
            let _ = child.wait().await;
            parse_line(&line)
        }
    }
}

async fn write_request(
    stdin: &mut (impl AsyncWriteExt + Unpin),
    payload: &serde_json::Value,
) -> Result<(), AdapterError> {
    let mut line = serde_json::to_vec(payload).map_err(|e| AdapterError::Protocol {
        message: e.to_string(),
    })?;
    line.push(b'\n');
    stdin.write_all(&line).await.map_err(|e| AdapterError::Protocol {
        message: format!("failed to write to child stdin: {e}"),
    })?;
    stdin.flush().await.map_err(|e| AdapterError::Protocol {
        message: format!("failed to flush child stdin: {e}"),
    })
}

/// Reads one line of JSON from stdout while mirroring stderr into a bounded ring buffer for
/// diagnostics on failure.
async fn read_one_line(
    stdout: &mut (impl tokio::io::AsyncRead + Unpin),
    stderr: &mut (impl tokio::io::AsyncRead + Unpin),
) -> Result<String, AdapterError> {
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut line = String::new();
    let mut err_ring: VecDeque<u8> = VecDeque::with_capacity(STDERR_RING_CAPACITY);
    let mut err_buf = [0u8; 1024];

    loop {
        tokio::select! {
            result = stdout_reader.read_line(&mut line) => {
                let n = result.map_err(|e| AdapterError::Protocol { message: e.to_string() })?;
                if n == 0 {
                    let stderr_text: String = err_ring.iter().map(|&b| b as char).collect();
                    return Err(AdapterError::Protocol {
                        message: format!("child process closed stdout without output; stderr: {stderr_text}"),
                    });
                }
                return Ok(line);
            }
            result = stderr_reader.get_mut().read(&mut err_buf) => {
                let n = result.unwrap_or(0);
                if n == 0 {
                    continue;
                }
                for &b in &err_buf[..n] {
                    if err_ring.len() == STDERR_RING_CAPACITY {
                        err_ring.pop_front();
                    }
                    err_ring.push_back(b);
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Result<serde_json::Value, AdapterError> {
    serde_json::from_str(line.trim()).map_err(|e| AdapterError::Protocol {
        message: format!("failed to parse child process output: {e}"),
    })
}

async fn terminate_direct(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(id) = child.id() {
            let pid = nix::unistd::Pid::from_raw(id as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
            tokio::select! {
                _ = child.wait() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
            let _ = child.kill().await;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }
}

#[async_trait]
impl AdapterRuntime for SpawnCliAdapter {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: NormalizedRequest,
    ) -> Result<AdapterResponse, AdapterError> {
        let value = self.run(ctx, &request.payload).await?;

        if !request.streaming {
            return Ok(AdapterResponse::Complete(value));
        }

        let stream = stream! {
            match serde_json::from_value::<StreamChunk>(value) {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => yield Err(AdapterError::Protocol { message: e.to_string() }),
            }
        };
        Ok(AdapterResponse::Stream(Box::pin(stream)))
    }

    async fn health_probe(&self) -> Result<(), String> {
        let which = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {}", self.command))
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if which.status.success() {
            Ok(())
        } else {
            Err(format!("command not found: {}", self.command))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_config_variant() {
        let cfg = AdapterConfig::Proxy {
            proxy_url: "http://x".to_string(),
            header_rewrites: Default::default(),
            remove_headers: vec![],
            timeout: Duration::from_secs(1),
        };
        assert!(SpawnCliAdapter::new(cfg).is_err());
    }

    #[tokio::test]
    async fn direct_mode_round_trips_echo_style_json() {
        let cfg = AdapterConfig::SpawnCli {
            command: "cat".to_string(),
            args: vec![],
            docker_sandbox: false,
            sandbox: None,
            timeout: Duration::from_secs(5),
        };
        let adapter = SpawnCliAdapter::new(cfg).unwrap();
        let ctx = InvocationContext {
            deadline: std::time::Instant::now() + Duration::from_secs(5),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let payload = serde_json::json!({"hello": "world"});
        let result = adapter.run(&ctx, &payload).await.unwrap();
        assert_eq!(result, payload);
    }
}
