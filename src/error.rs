//! Error types for the bridge coordinator.

use thiserror::Error;

/// Failures that end a bridge run before or while it starts.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No command was given to run.
    #[error("no command given")]
    EmptyCommand,

    /// The child process could not be launched.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without one of its piped streams.
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
}
