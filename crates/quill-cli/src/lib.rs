//! The `quill` command line: replay recorded model transcripts through the
//! renderer, to the terminal or to a real Telegram chat.

pub mod console;
pub mod metrics;
pub mod replay;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::style::Stylize;
use quill_core::{ChatTarget, Config, Delivery, Language, TelegramDelivery};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleDelivery;
use crate::metrics::{format_elapsed_time, generate_replay_histogram, ReplayMetrics};
use crate::replay::{replay_all, ReplayContext, ReplaySettings};

#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "Stream model output into chat messages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to <config dir>/quill/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay JSONL transcripts through the renderer
    Replay(ReplayArgs),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Transcript files, replayed concurrently
    #[arg(required = true, num_args = 1.., value_name = "TRANSCRIPT")]
    pub files: Vec<PathBuf>,

    /// Show the model's reasoning as quotes
    #[arg(long)]
    pub show_thinking: bool,

    /// Language for status lines and fixed answers (en, ru, uk)
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Deliver to Telegram instead of the terminal
    #[arg(long, requires = "chat_id")]
    pub telegram: bool,

    #[arg(long, allow_hyphen_values = true)]
    pub chat_id: Option<i64>,

    /// Forum topic inside the chat
    #[arg(long)]
    pub thread_id: Option<i64>,

    /// Print preview frames too (console only)
    #[arg(long)]
    pub previews: bool,

    /// User message stored ahead of each replayed answer
    #[arg(long, default_value = "(replayed transcript)")]
    pub prompt: String,

    #[arg(long)]
    pub system_prompt: Option<String>,
}

/// Install the global subscriber. `RUST_LOG` wins over the default level.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose);
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&redacted(config))?);
            Ok(())
        }
        Command::Replay(args) => run_replay(config, args).await,
    }
}

fn redacted(mut config: Config) -> Config {
    if config.telegram.bot_token.is_some() {
        config.telegram.bot_token = Some("<redacted>".to_string());
    }
    config
}

/// Where replayed messages go, resolved from the arguments.
pub fn replay_target(args: &ReplayArgs) -> Result<ChatTarget> {
    let chat_id = match (args.telegram, args.chat_id) {
        (true, None) => bail!("--telegram needs --chat-id"),
        (_, Some(id)) => id,
        (false, None) => 0,
    };
    let target = ChatTarget::new(chat_id);
    Ok(match args.thread_id {
        Some(thread) => target.in_thread(thread),
        None => target,
    })
}

async fn run_replay(config: Config, args: ReplayArgs) -> Result<()> {
    let target = replay_target(&args)?;
    let delivery: Arc<dyn Delivery> = if args.telegram {
        info!("Delivering to Telegram chat {}", target.chat_id);
        Arc::new(TelegramDelivery::from_config(&config.telegram)?)
    } else {
        Arc::new(ConsoleDelivery::new(args.previews))
    };

    let context = ReplayContext::new(delivery, config.render)?;
    let settings = ReplaySettings {
        target,
        show_thinking: args.show_thinking,
        language: Language::from_tag(&args.lang),
        prompt: args.prompt,
        system_prompt: args.system_prompt,
    };
    debug!("Replay settings: {:?}", settings);

    let started = Instant::now();
    let reports = replay_all(&context, &settings, &args.files).await;

    let mut metrics = Vec::new();
    let mut failures = 0usize;
    for report in &reports {
        match &report.result {
            Ok(outcome) => metrics.push(ReplayMetrics::from_outcome(&report.label, outcome)),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {:#}", "✗".red(), report.label, e);
            }
        }
    }

    println!("{}", generate_replay_histogram(&metrics));
    println!(
        "\n{} {} replays in {}",
        "✓".green(),
        metrics.len(),
        format_elapsed_time(started.elapsed())
    );

    if failures > 0 {
        bail!("{} of {} replays failed", failures, reports.len());
    }
    Ok(())
}
