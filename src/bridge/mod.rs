//! The bridge between a child program and a language model.
//!
//! The coordinator spawns the child and four tasks that share two queues and
//! a [`ShutdownSignal`]:
//!
//! ```text
//!  child stdout ──▶ reader ──blocks──▶ responder ──replies──▶ writer ──▶ child stdin
//!                                          │
//!                                       model API
//!
//!  terminal ──▶ listener ──exit──▶ shutdown signal (observed by all)
//! ```
//!
//! A run moves through [`Phase::Starting`], [`Phase::Running`],
//! [`Phase::Draining`] and [`Phase::Terminated`]. Draining gives the workers
//! the drain timeout to finish; the writer closes the child's stdin on its way
//! out. The child then has the grace period to exit before it is terminated.

pub mod listener;
pub mod reader;
pub mod responder;
pub mod shutdown;
pub mod writer;

use crate::config::BridgeSettings;
use crate::error::BridgeError;
use crate::llm::Completer;
use crate::transcript::Transcript;
use anyhow::Result;
use responder::Conversation;
use shutdown::{ShutdownReason, ShutdownSignal};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a child gets after SIGTERM before it is killed.
const TERM_WAIT: Duration = Duration::from_secs(1);

/// Lifecycle of a bridge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct BridgeOutcome {
    /// What ended the run.
    pub reason: ShutdownReason,
    /// The child's exit status, if it was collected.
    pub exit_status: Option<ExitStatus>,
    /// Whether the child had to be terminated after the grace period.
    pub terminated: bool,
}

/// Connects a child program's stdio to a [`Completer`].
pub struct Bridge<C: ?Sized> {
    settings: BridgeSettings,
    completer: Arc<C>,
    transcript: Transcript,
}

impl<C> Bridge<C>
where
    C: Completer + ?Sized + 'static,
{
    pub fn new(settings: BridgeSettings, completer: Arc<C>) -> Self {
        let transcript = Transcript::new(settings.echo);
        Self {
            settings,
            completer,
            transcript,
        }
    }

    /// Run `command` until the operator exits or the child finishes.
    ///
    /// `terminal` is the operator's input, normally the process stdin.
    pub async fn run<T>(&self, command: &[String], terminal: T) -> Result<BridgeOutcome>
    where
        T: AsyncRead + Unpin + Send + 'static,
    {
        enter(Phase::Starting);
        let mut child = spawn_child(command)?;
        let stdin = child
            .stdin
            .take()
            .ok_or(BridgeError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(BridgeError::MissingPipe("stdout"))?;

        let shutdown = ShutdownSignal::new();
        let (block_tx, block_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let workers = [
            tokio::spawn(reader::run_output_reader(
                stdout,
                self.settings.end_of_prompt.clone(),
                block_tx,
                shutdown.clone(),
            )),
            tokio::spawn(responder::run_responder(
                Arc::clone(&self.completer),
                block_rx,
                reply_tx,
                Conversation::from_settings(&self.settings),
                self.transcript,
                shutdown.clone(),
            )),
            tokio::spawn(writer::run_input_writer(
                stdin,
                reply_rx,
                self.settings.reply_delay(),
                shutdown.clone(),
            )),
        ];
        let listener = tokio::spawn(listener::run_exit_listener(
            terminal,
            self.transcript,
            shutdown.clone(),
        ));

        enter(Phase::Running);
        let mut exit_status = None;
        tokio::select! {
            _ = shutdown.triggered() => {}
            status = child.wait() => {
                match status {
                    Ok(status) => {
                        info!("Child exited with {}", status);
                        exit_status = Some(status);
                    }
                    Err(e) => warn!("Failed to wait for child: {}", e),
                }
                shutdown.trigger(ShutdownReason::ChildExited);
            }
        }
        let reason = shutdown.reason().unwrap_or(ShutdownReason::ChildExited);
        info!("Shutting down: {}", reason);

        enter(Phase::Draining);
        self.drain_workers(workers).await;

        let mut terminated = false;
        if exit_status.is_none() {
            exit_status = match tokio::time::timeout(self.settings.grace_period(), child.wait())
                .await
            {
                Ok(Ok(status)) => {
                    info!("Child exited with {}", status);
                    Some(status)
                }
                Ok(Err(e)) => {
                    warn!("Failed to wait for child: {}", e);
                    None
                }
                Err(_) => {
                    warn!(
                        "Child still running after {:?}, terminating it",
                        self.settings.grace_period()
                    );
                    terminated = true;
                    terminate(&mut child).await
                }
            };
        }

        enter(Phase::Terminated);
        let listener_result = if listener.is_finished() {
            listener.await.ok()
        } else {
            listener.abort();
            None
        };
        if let Some(Err(e)) = listener_result {
            return Err(e);
        }

        Ok(BridgeOutcome {
            reason,
            exit_status,
            terminated,
        })
    }

    /// Give reader, responder and writer the drain timeout to finish, then
    /// abort whatever is left.
    async fn drain_workers(&self, workers: [tokio::task::JoinHandle<()>; 3]) {
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let timeout = self.settings.drain_timeout();

        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Bridge task ended abnormally: {}", e);
                    }
                }
                debug!("All bridge tasks finished");
            }
            Err(_) => {
                warn!("Bridge tasks still busy after {:?}, cancelling them", timeout);
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

fn enter(phase: Phase) {
    debug!("Bridge phase: {}", phase);
}

/// Spawn the child with piped stdin/stdout and inherited stderr.
fn spawn_child(command: &[String]) -> Result<Child, BridgeError> {
    let (program, args) = command.split_first().ok_or(BridgeError::EmptyCommand)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BridgeError::Spawn {
            command: command.join(" "),
            source,
        })?;

    info!(
        "Started '{}' (PID {})",
        command.join(" "),
        child.id().unwrap_or_default()
    );
    Ok(child)
}

/// Ask the child to stop, then kill it if it does not.
async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(Ok(status)) = tokio::time::timeout(TERM_WAIT, child.wait()).await {
                        info!("Child terminated with {}", status);
                        return Some(status);
                    }
                }
                Err(e) => debug!("SIGTERM to PID {} failed: {}", pid, e),
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill child: {}", e);
        return None;
    }
    let status = child.wait().await.ok();
    if let Some(status) = status {
        info!("Child killed ({})", status);
    }
    status
}
