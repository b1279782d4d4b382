//! Output reader: turns the child's stdout into prompt blocks.
//!
//! Lines are collected until one of them is exactly the end-of-prompt
//! marker (surrounding whitespace ignored). The collected lines, joined with
//! `\n`, become one block on the request queue. Lines after the last marker
//! are never sent.

use super::shutdown::{ShutdownReason, ShutdownSignal};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Accumulates lines until the end-of-prompt marker shows up.
#[derive(Debug)]
pub struct BlockAccumulator {
    marker: String,
    lines: Vec<String>,
}

impl BlockAccumulator {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.trim().to_string(),
            lines: Vec::new(),
        }
    }

    /// Feed one line; returns a finished block when `line` is the marker.
    ///
    /// A marker that closes only blank lines yields nothing.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line != self.marker {
            self.lines.push(line.to_string());
            return None;
        }

        let block = std::mem::take(&mut self.lines).join("\n");
        if block.trim().is_empty() {
            None
        } else {
            Some(block)
        }
    }

    /// Number of lines waiting for a marker.
    pub fn pending_lines(&self) -> usize {
        self.lines.len()
    }
}

/// Read the child's stdout until it closes or shutdown is signalled.
///
/// End of stream triggers shutdown with [`ShutdownReason::OutputClosed`].
pub async fn run_output_reader<R>(
    source: R,
    marker: String,
    blocks: UnboundedSender<String>,
    shutdown: ShutdownSignal,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(source).lines();
    let mut accumulator = BlockAccumulator::new(&marker);
    debug!("Output reader started (marker: {:?})", marker);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.triggered() => {
                debug!("Output reader stopping on shutdown");
                break;
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(block) = accumulator.push_line(&line) {
                        debug!("Block complete ({} bytes)", block.len());
                        if blocks.send(block).is_err() {
                            debug!("Request queue closed, output reader stopping");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    info!("Child closed its output");
                    shutdown.trigger(ShutdownReason::OutputClosed);
                    break;
                }
                Err(e) => {
                    warn!("Error reading child output: {}", e);
                    shutdown.trigger(ShutdownReason::OutputClosed);
                    break;
                }
            }
        }
    }

    if accumulator.pending_lines() > 0 {
        debug!(
            "Discarding {} line(s) without an end-of-prompt marker",
            accumulator.pending_lines()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn read_blocks(output: &'static str, marker: &str) -> (Vec<String>, ShutdownSignal) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = ShutdownSignal::new();
        run_output_reader(output.as_bytes(), marker.to_string(), tx, shutdown.clone()).await;

        let mut blocks = Vec::new();
        while let Ok(block) = rx.try_recv() {
            blocks.push(block);
        }
        (blocks, shutdown)
    }

    #[test]
    fn test_single_marker_yields_preceding_lines() {
        let mut acc = BlockAccumulator::new("DONE");
        assert_eq!(acc.push_line("You are in a maze."), None);
        assert_eq!(acc.push_line("Which way?"), None);
        assert_eq!(
            acc.push_line("DONE"),
            Some("You are in a maze.\nWhich way?".to_string())
        );
        assert_eq!(acc.pending_lines(), 0);
    }

    #[test]
    fn test_marker_match_is_whole_line() {
        let mut acc = BlockAccumulator::new("DONE");
        assert_eq!(acc.push_line("NOT DONE"), None);
        assert_eq!(acc.push_line("DONE yet?"), None);
        assert_eq!(acc.pending_lines(), 2);
        assert_eq!(
            acc.push_line("  DONE\r"),
            Some("NOT DONE\nDONE yet?".to_string())
        );
    }

    #[test]
    fn test_blank_block_is_skipped() {
        let mut acc = BlockAccumulator::new("DONE");
        assert_eq!(acc.push_line("DONE"), None);
        assert_eq!(acc.push_line(""), None);
        assert_eq!(acc.push_line("DONE"), None);
        assert_eq!(acc.pending_lines(), 0);
    }

    #[test]
    fn test_lines_are_trimmed() {
        let mut acc = BlockAccumulator::new(" END ");
        acc.push_line("  hunger: 3  ");
        assert_eq!(acc.push_line("END"), Some("hunger: 3".to_string()));
    }

    #[tokio::test]
    async fn test_reader_emits_blocks_in_order() {
        let (blocks, _) = read_blocks("a\nb\nDONE\nc\nDONE\n", "DONE").await;
        assert_eq!(blocks, vec!["a\nb".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_reader_without_marker_emits_nothing() {
        let (blocks, shutdown) = read_blocks("a\nb\nc\n", "DONE").await;
        assert!(blocks.is_empty());
        assert_eq!(shutdown.reason(), Some(ShutdownReason::OutputClosed));
    }

    #[tokio::test]
    async fn test_reader_drops_unterminated_tail() {
        let (blocks, _) = read_blocks("q1\nDONE\npartial", "DONE").await;
        assert_eq!(blocks, vec!["q1".to_string()]);
    }

    #[tokio::test]
    async fn test_reader_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = ShutdownSignal::new();
        let (_child_end, reader_end) = tokio::io::duplex(64);

        shutdown.trigger(ShutdownReason::UserExit);
        run_output_reader(reader_end, "DONE".to_string(), tx, shutdown.clone()).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(shutdown.reason(), Some(ShutdownReason::UserExit));
    }
}
