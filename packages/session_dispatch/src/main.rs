use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use session_dispatch::config::{FileConfig, default_config_dir, load_config};
use session_dispatch::{
    DispatcherConfig, ScriptFile, ScriptedAgent, SessionDispatcher, SubmitPolicy, ThreadId,
};

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Replay scripted agent turns through the session dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding dispatch.toml (defaults to ~/.session-dispatch)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit every turn of a script and print what each subscriber receives
    Replay(ReplayArgs),

    /// Print the effective configuration
    ShowConfig,
}

#[derive(Parser)]
struct ReplayArgs {
    /// JSON script of turns and snapshots
    #[arg(short, long)]
    script: PathBuf,

    /// Thread to run on (defaults to the script's thread, or a fresh id)
    #[arg(short, long)]
    thread: Option<String>,

    /// Number of subscribers to attach before the first turn
    #[arg(short = 'n', long, default_value = "1")]
    subscribers: usize,

    /// Override the configured submit policy
    #[arg(long, value_enum)]
    submit_policy: Option<SubmitPolicy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir().context("Could not find home directory")?,
    };
    let file_config: FileConfig = load_config(&config_dir)
        .extract()
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;

    match cli.command {
        Commands::Replay(args) => replay(args, &file_config).await,
        Commands::ShowConfig => {
            let rendered =
                toml::to_string_pretty(&file_config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

async fn replay(args: ReplayArgs, file_config: &FileConfig) -> Result<()> {
    let mut config = DispatcherConfig::from_file(&file_config.dispatcher);
    if let Some(policy) = args.submit_policy {
        config = config.with_submit_policy(policy);
    }

    let script = ScriptFile::load(&args.script)
        .with_context(|| format!("Failed to load script {:?}", args.script))?;

    let thread = match args.thread.or_else(|| script.thread.clone()) {
        Some(id) => ThreadId::new(id).context("Invalid thread id")?,
        None => ThreadId::generate(),
    };
    let inputs: Vec<String> = script
        .turns
        .iter()
        .map(|turn| turn.input.clone().unwrap_or_default())
        .collect();

    info!(
        "Replaying {} turn(s) on thread {} with {} subscriber(s)",
        inputs.len(),
        thread,
        args.subscribers
    );

    let agent = ScriptedAgent::with_turns(script.turns);
    let dispatcher = Arc::new(SessionDispatcher::with_config(Arc::new(agent), config));

    let mut handles = Vec::with_capacity(args.subscribers);
    let mut printers = Vec::with_capacity(args.subscribers);
    for index in 0..args.subscribers {
        let (handle, mut rx) = dispatcher.subscribe_channel(&thread).await;
        handles.push(handle);
        printers.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let line = serde_json::json!({ "sink": index, "message": message });
                println!("{}", line);
            }
        }));
    }

    let mut failed = 0;
    for (turn, input) in inputs.iter().enumerate() {
        match dispatcher.submit(&thread, input).await {
            Ok(summary) => info!(
                "Turn {}: {} new message(s), {} suppressed",
                turn + 1,
                summary.messages,
                summary.suppressed
            ),
            Err(e) => {
                failed += 1;
                warn!("Turn {} failed: {}", turn + 1, e);
            }
        }
    }

    // Dropping the subscriptions closes each channel so the printers drain and exit
    for handle in handles {
        dispatcher.unsubscribe(&thread, handle).await;
    }
    for printer in printers {
        printer.await.context("Subscriber task panicked")?;
    }

    let metrics = serde_json::to_string_pretty(&dispatcher.metrics())?;
    eprintln!("{}", metrics);

    if failed > 0 {
        anyhow::bail!("{} of {} turn(s) failed", failed, inputs.len());
    }
    Ok(())
}
