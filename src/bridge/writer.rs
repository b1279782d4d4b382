//! Input writer: types the model's replies into the child's stdin.
//!
//! The writer is the only owner of the child's stdin. When it returns, the
//! handle is dropped and the child sees end-of-input.

use super::shutdown::{ShutdownReason, ShutdownSignal};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error};

/// Write queued replies until the queue closes.
///
/// The responder owns the only sender and drops it once it has answered
/// every queued block, so replies finished after shutdown still reach the
/// child. Shutdown cuts the reply delay short.
pub async fn run_input_writer<W>(
    mut sink: W,
    mut replies: UnboundedReceiver<String>,
    reply_delay: Duration,
    shutdown: ShutdownSignal,
) where
    W: AsyncWrite + Unpin,
{
    debug!("Input writer started");

    while let Some(reply) = replies.recv().await {
        if !reply_delay.is_zero() {
            tokio::select! {
                biased;

                _ = shutdown.triggered() => {}
                _ = tokio::time::sleep(reply_delay) => {}
            }
        }

        if let Err(e) = write_line(&mut sink, &reply).await {
            if shutdown.is_triggered() {
                debug!("Write to child failed during shutdown: {}", e);
            } else {
                error!("Failed to write reply to child: {}", e);
                shutdown.trigger(ShutdownReason::WriteFailed);
            }
            break;
        }
        debug!("Wrote {} bytes to child", reply.len() + 1);
    }
    debug!("Input writer stopping");

    if let Err(e) = sink.shutdown().await {
        debug!("Closing child stdin: {}", e);
    }
    drop(sink);
}

/// Write `text` and a newline, then flush so the child sees it at once.
async fn write_line<W>(sink: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(text.as_bytes()).await?;
    sink.write_all(b"\n").await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    async fn read_all(mut stream: tokio::io::DuplexStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_replies_written_in_order_with_newlines() {
        let (child_end, bridge_end) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("north".to_string()).unwrap();
        tx.send("take lamp".to_string()).unwrap();
        drop(tx);

        run_input_writer(bridge_end, rx, Duration::ZERO, ShutdownSignal::new()).await;

        assert_eq!(read_all(child_end).await, "north\ntake lamp\n");
    }

    #[tokio::test]
    async fn test_drains_queue_after_shutdown() {
        let (child_end, bridge_end) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("last words".to_string()).unwrap();

        let shutdown = ShutdownSignal::new();
        shutdown.trigger(ShutdownReason::UserExit);
        let writer = tokio::spawn(run_input_writer(bridge_end, rx, Duration::ZERO, shutdown));

        // A reply the responder finishes after shutdown is still written.
        tokio::task::yield_now().await;
        tx.send("late reply".to_string()).unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(read_all(child_end).await, "last words\nlate reply\n");
    }

    #[tokio::test]
    async fn test_shutdown_cuts_reply_delay_short() {
        let (child_end, bridge_end) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("look".to_string()).unwrap();
        drop(tx);

        let shutdown = ShutdownSignal::new();
        let writer = tokio::spawn(run_input_writer(
            bridge_end,
            rx,
            Duration::from_secs(60),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger(ShutdownReason::UserExit);

        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should not wait out the delay after shutdown")
            .unwrap();
        assert_eq!(read_all(child_end).await, "look\n");
    }

    #[tokio::test]
    async fn test_write_failure_triggers_shutdown() {
        let (child_end, bridge_end) = tokio::io::duplex(16);
        drop(child_end);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("nobody is listening".to_string()).unwrap();

        let shutdown = ShutdownSignal::new();
        run_input_writer(bridge_end, rx, Duration::ZERO, shutdown.clone()).await;

        assert_eq!(shutdown.reason(), Some(ShutdownReason::WriteFailed));
        drop(tx);
    }
}
