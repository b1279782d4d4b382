//! Live echo of the exchange between the child program and the model.
//!
//! Blocks and replies go to stdout so the operator can follow along; notices
//! go to stderr next to the log output.

use crossterm::style::Stylize;

#[derive(Debug, Clone, Copy)]
pub struct Transcript {
    enabled: bool,
}

impl Transcript {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// A block the child produced, about to be sent to the model.
    pub fn block(&self, block: &str) {
        if self.enabled {
            println!("\n{}\n{}", "[Command Output]".cyan().bold(), block);
        }
    }

    /// A reply from the model, about to be written to the child.
    pub fn reply(&self, reply: &str) {
        if self.enabled {
            println!("{}\n{}", "[LLM Reply]".green().bold(), reply);
        }
    }

    /// A message for the operator; printed even when echo is off.
    pub fn notice(&self, message: &str) {
        eprintln!("{} {}", "[Bridge]".yellow(), message);
    }
}
