//! LLM responder: sends each block to the model and queues the reply.
//!
//! A single responder task runs per bridge, so completion calls are made one
//! at a time and replies come out in block order.

use super::shutdown::ShutdownSignal;
use crate::config::BridgeSettings;
use crate::llm::{ChatMessage, Completer};
use crate::transcript::Transcript;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

/// Chat history sent along with each block.
#[derive(Debug, Clone)]
pub struct Conversation {
    system: Option<ChatMessage>,
    history: Vec<ChatMessage>,
    keep_history: bool,
    max_turns: Option<usize>,
}

impl Conversation {
    pub fn new(system_prompt: &str, keep_history: bool, max_turns: Option<usize>) -> Self {
        let system = (!system_prompt.trim().is_empty()).then(|| ChatMessage::system(system_prompt));
        Self {
            system,
            history: Vec::new(),
            keep_history,
            max_turns,
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(
            &settings.system_prompt,
            settings.history,
            settings.history_turns,
        )
    }

    /// Messages to send for a new block.
    pub fn request(&self, block: &str) -> Vec<ChatMessage> {
        self.system
            .iter()
            .chain(self.history.iter())
            .cloned()
            .chain(std::iter::once(ChatMessage::user(block)))
            .collect()
    }

    /// Remember a completed exchange.
    ///
    /// Failed calls are never recorded, so a block without a reply does not
    /// linger in the history.
    pub fn record(&mut self, block: &str, reply: &str) {
        if !self.keep_history {
            return;
        }
        self.history.push(ChatMessage::user(block));
        self.history.push(ChatMessage::assistant(reply));

        if let Some(max) = self.max_turns {
            let keep = max * 2;
            if self.history.len() > keep {
                let excess = self.history.len() - keep;
                self.history.drain(..excess);
            }
        }
    }

    /// Number of recorded block/reply pairs.
    pub fn turns(&self) -> usize {
        self.history.len() / 2
    }
}

/// Answer blocks from the request queue until the queue closes, or until
/// shutdown is signalled and the queue is empty.
///
/// Blocks queued before shutdown are still answered, and the reply of a call
/// in flight when shutdown fires is still queued. Returning drops the reply
/// sender, which is what ends the input writer.
pub async fn run_responder<C>(
    completer: Arc<C>,
    mut blocks: UnboundedReceiver<String>,
    replies: UnboundedSender<String>,
    mut conversation: Conversation,
    transcript: Transcript,
    shutdown: ShutdownSignal,
) where
    C: Completer + ?Sized,
{
    debug!("LLM responder started");

    loop {
        // Queued blocks take priority so shutdown only stops an idle responder.
        let block = tokio::select! {
            biased;

            next = blocks.recv() => match next {
                Some(block) => block,
                None => {
                    debug!("Request queue closed, LLM responder stopping");
                    break;
                }
            },

            _ = shutdown.triggered() => {
                debug!("LLM responder stopping on shutdown");
                break;
            }
        };

        transcript.block(&block);
        let messages = conversation.request(&block);

        let reply = match completer.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("LLM request failed, skipping block: {:#}", e);
                continue;
            }
        };

        conversation.record(&block, &reply);
        debug!("Conversation holds {} turn(s)", conversation.turns());

        if reply.trim().is_empty() {
            warn!("Model returned an empty reply; nothing sent to the child");
            continue;
        }

        transcript.reply(&reply);
        if replies.send(reply).is_err() {
            debug!("Response queue closed, LLM responder stopping");
            break;
        }
    }
}
