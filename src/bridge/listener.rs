//! Operator input: watches the terminal for the `exit` command.

use super::shutdown::{ShutdownReason, ShutdownSignal};
use crate::transcript::Transcript;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// True for `exit`, ignoring surrounding whitespace and ASCII case.
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("exit")
}

/// Read operator lines until `exit`, end of input, or shutdown.
///
/// End of input is not an exit request: with no terminal attached the run
/// ends when the child does. A read error triggers
/// [`ShutdownReason::ListenerFailed`] and is returned.
pub async fn run_exit_listener<R>(
    input: R,
    transcript: Transcript,
    shutdown: ShutdownSignal,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    loop {
        let line = tokio::select! {
            biased;

            _ = shutdown.triggered() => return Ok(()),

            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if is_exit_command(&line) => {
                info!("Exit requested from terminal");
                transcript.notice("Shutting down...");
                shutdown.trigger(ShutdownReason::UserExit);
                return Ok(());
            }
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    transcript.notice("Input is not passed to the program. Type 'exit' to quit.");
                }
            }
            Ok(None) => {
                debug!("Terminal input closed; exit listener stopping");
                return Ok(());
            }
            Err(e) => {
                shutdown.trigger(ShutdownReason::ListenerFailed);
                return Err(e).context("Failed to read terminal input");
            }
        }
    }
}
