//! llmbridge - let a language model drive an interactive command-line program.
//!
//! The child's output is collected into blocks ending with a marker line,
//! each block is sent to the model, and the model's reply is typed back into
//! the child's stdin.

mod bridge;
mod config;
mod error;
mod llm;
mod transcript;

use anyhow::{Context, Result};
use bridge::Bridge;
use clap::Parser;
use config::{BackendKind, Config, Overrides};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transcript::Transcript;

#[derive(Parser)]
#[command(name = "llmbridge")]
#[command(author, version, about = "Let a language model drive an interactive command-line program")]
#[command(long_about = "Runs COMMAND, sends each block of its output that ends with the \
end-of-prompt marker line to a language model, and writes the model's reply to the \
command's stdin.\n\nType 'exit' to stop.")]
struct Cli {
    /// Command to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        required_unless_present = "print_config"
    )]
    command: Vec<String>,

    /// Model to use (e.g., llama3, mistral)
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Line that marks the end of the command's output block
    #[arg(short = 'e', long, value_name = "MARKER")]
    end_of_prompt: Option<String>,

    /// LLM provider to use
    #[arg(short = 'b', long, value_enum)]
    backend: Option<BackendKind>,

    /// Ollama host URL
    #[arg(long, value_name = "URL")]
    host: Option<String>,

    /// System prompt sent ahead of the conversation ("" disables it)
    #[arg(long, value_name = "TEXT")]
    system_prompt: Option<String>,

    /// Send each block on its own, without earlier blocks and replies
    #[arg(long)]
    no_history: bool,

    /// Keep at most this many earlier block/reply pairs
    #[arg(long, value_name = "N")]
    history_turns: Option<usize>,

    /// Wait this long before writing each reply
    #[arg(long, value_name = "MS")]
    reply_delay: Option<u64>,

    /// How long the command gets to exit once its stdin is closed
    #[arg(long, value_name = "MS")]
    grace_period: Option<u64>,

    /// Do not echo blocks and replies
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Config file (default: ~/.config/llmbridge/config.toml)
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend,
            model: self.model.clone(),
            host: self.host.clone(),
            end_of_prompt: self.end_of_prompt.clone(),
            system_prompt: self.system_prompt.clone(),
            no_history: self.no_history,
            history_turns: self.history_turns,
            reply_delay_ms: self.reply_delay,
            grace_period_ms: self.grace_period,
            quiet: self.quiet,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.apply(cli.overrides());
    config.validate()?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        "[{}] <--> [{} model: {}] bridge starting",
        cli.command.join(" "),
        config.backend_type(),
        config.model_name()
    );

    let backend = llm::create_backend(&config.backend, &config.generation)?;
    if let Err(e) = backend.health_check().await {
        warn!(
            "Backend {} ({}) is not ready: {:#}",
            backend.name(),
            backend.model(),
            e
        );
    }

    if atty::is(atty::Stream::Stdin) {
        Transcript::new(config.bridge.echo).notice("Type 'exit' to terminate.");
    }

    let bridge = Bridge::new(config.bridge.clone(), Arc::new(backend));
    let outcome = bridge.run(&cli.command, tokio::io::stdin()).await?;

    match outcome.exit_status {
        Some(status) => info!("Command exited with {} ({})", status, outcome.reason),
        None => warn!("Command exit status unknown ({})", outcome.reason),
    }
    if outcome.terminated {
        warn!("Command did not exit on its own and was terminated");
    }

    // A pending terminal read holds a blocking thread that would stall
    // runtime shutdown, so leave directly.
    std::process::exit(0);
}

/// Initialize logging to stderr, keeping stdout for the transcript.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        "llmbridge=debug"
    } else {
        "llmbridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(level.parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
