//! Shared shutdown signal observed by every bridge task.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The operator typed `exit`.
    UserExit,
    /// The child closed its stdout.
    OutputClosed,
    /// The child process exited.
    ChildExited,
    /// Writing a reply to the child's stdin failed.
    WriteFailed,
    /// Reading the operator's terminal failed.
    ListenerFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::UserExit => "operator requested exit",
            ShutdownReason::OutputClosed => "child closed its output",
            ShutdownReason::ChildExited => "child exited",
            ShutdownReason::WriteFailed => "writing to child failed",
            ShutdownReason::ListenerFailed => "terminal input failed",
        };
        f.write_str(text)
    }
}

/// Cloneable, set-once stop signal.
///
/// The first [`trigger`](Self::trigger) records its reason and cancels the
/// token; later triggers are ignored.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` if this call set the signal.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason recorded by the first trigger.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Resolves once the signal is set.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger(ShutdownReason::UserExit));
        assert!(!signal.trigger(ShutdownReason::ChildExited));
        assert!(signal.is_triggered());
        assert_eq!(signal.reason(), Some(ShutdownReason::UserExit));
    }

    #[tokio::test]
    async fn test_clones_observe_trigger() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        let waiter = tokio::spawn(async move { observer.triggered().await });

        signal.trigger(ShutdownReason::OutputClosed);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
