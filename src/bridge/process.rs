//! Locally spawned language server process.
//!
//! The bridge talks to the server over TCP, so the child's stdout and stderr
//! carry nothing but diagnostics. Both pipes are drained into debug logs so
//! the child never blocks on a full pipe.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, BridgeResult};

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Handle to a server process spawned by the bridge.
///
/// Dropping the handle kills the child (`kill_on_drop`), but callers should
/// prefer `terminate()` which also reaps it.
#[derive(Debug)]
pub struct ServerProcess {
    command: String,
    child: Child,
    drains: Vec<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawn `command` with `args` in `workspace`.
    ///
    /// stdin is closed; stdout and stderr are piped and drained to the
    /// `tsunagi::process` log target.
    ///
    /// # Errors
    /// `Process` if the executable cannot be started.
    pub fn spawn(
        command: &str,
        args: &[String],
        workspace: Option<&std::path::Path>,
    ) -> BridgeResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workspace {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| BridgeError::Process {
            command: command.to_string(),
            source,
        })?;

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(command.to_string(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain(command.to_string(), "stderr", stderr));
        }

        log::info!(
            target: "tsunagi::process",
            "Spawned language server '{}' (pid {:?})",
            command,
            child.id()
        );

        Ok(Self {
            command: command.to_string(),
            child,
            drains,
        })
    }

    /// OS process id, `None` once the child has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the child has exited (without blocking).
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Stop the server and reap it.
    ///
    /// Unix: SIGTERM, then SIGKILL if the child is still alive after the grace
    /// period. Elsewhere the child is killed directly. Safe to call on a child
    /// that already exited.
    ///
    /// Returns the exit code, or `None` when the child was ended by a signal.
    pub async fn terminate(mut self) -> BridgeResult<Option<i32>> {
        if let Ok(Some(status)) = self.child.try_wait() {
            log::debug!(
                target: "tsunagi::process",
                "Language server '{}' already exited: {}",
                self.command,
                status
            );
            self.finish_drains().await;
            return Ok(status.code());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                log::debug!(
                    target: "tsunagi::process",
                    "Sending SIGTERM to language server (pid {})",
                    pid
                );
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::warn!(
                        target: "tsunagi::process",
                        "SIGTERM to pid {} failed: {}",
                        pid,
                        e
                    );
                }
            }

            if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
                log::info!(
                    target: "tsunagi::process",
                    "Language server '{}' exited after SIGTERM: {}",
                    self.command,
                    status
                );
                self.finish_drains().await;
                return Ok(status.code());
            }

            log::warn!(
                target: "tsunagi::process",
                "Language server '{}' ignored SIGTERM, sending SIGKILL",
                self.command
            );
        }

        if let Err(e) = self.child.kill().await {
            log::error!(
                target: "tsunagi::process",
                "Failed to kill language server '{}': {}",
                self.command,
                e
            );
        }

        // Reap to avoid a zombie
        let status = self.child.wait().await.map_err(|source| BridgeError::Process {
            command: self.command.clone(),
            source,
        })?;
        log::info!(
            target: "tsunagi::process",
            "Language server '{}' stopped: {}",
            self.command,
            status
        );
        self.finish_drains().await;
        Ok(status.code())
    }

    async fn finish_drains(&mut self) {
        for drain in self.drains.drain(..) {
            // Pipes close with the child; never wait on a grandchild holding them
            if tokio::time::timeout(Duration::from_millis(200), drain).await.is_err() {
                log::debug!(target: "tsunagi::process", "Output drain still running, detaching");
            }
        }
    }
}

fn spawn_drain<R>(command: String, stream: &'static str, pipe: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    log::debug!(target: "tsunagi::process", "[{} {}] {}", command, stream, line);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!(
                        target: "tsunagi::process",
                        "[{} {}] read error: {}",
                        command,
                        stream,
                        e
                    );
                    break;
                }
            }
        }
    })
}
