//! Briefing - operator CLI
//!
//! - `briefing serve` - start the configured workers and hold them until Ctrl-C
//! - `briefing tools` - print the unified tool catalog
//! - `briefing ask` - one agent run against the workers
//! - `briefing chat` - interactive runs, one per line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use briefing_core::agent::{AgentLoop, LoopEvent, Mode};
use briefing_core::ai::{create_engine, ReasoningEngine};
use briefing_core::{paths, BriefingConfig, BriefingRuntime};

/// Briefing - mission briefing assistant over tool workers
#[derive(Parser)]
#[command(name = "briefing")]
#[command(about = "Mission briefing assistant over supervised tool workers", long_about = None)]
struct Cli {
    /// Config file (default: ./briefing.yaml, then ~/.briefing/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to ~/.briefing/logs/briefing.log instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all workers and keep them running until Ctrl-C
    Serve,

    /// List every tool in the unified namespace
    Tools,

    /// Run the agent once and print the answer
    Ask {
        /// The request for the agent
        prompt: String,

        /// Wrap tool output as untrusted data
        #[arg(long)]
        mitigated: bool,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read prompts from stdin, one independent run per line
    Chat {
        /// Wrap tool output as untrusted data
        #[arg(long)]
        mitigated: bool,
    },
}

fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_file {
        let log_dir = paths::logs_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
        let log_file = std::fs::File::create(log_dir.join("briefing.log"))
            .context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .init();
    } else {
        // stdout carries answers and JSON, logs go to stderr
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn load_config(explicit: Option<PathBuf>) -> Result<BriefingConfig> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    match paths::resolve_config_path(explicit.as_deref(), &cwd) {
        Some(path) => BriefingConfig::load(&path).await,
        None => {
            tracing::warn!("No config file found, starting without workers");
            Ok(BriefingConfig {
                base_dir: cwd,
                ..Default::default()
            })
        }
    }
}

/// Echo tool activity to stderr while a run is in progress
fn spawn_event_printer() -> mpsc::UnboundedSender<LoopEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                LoopEvent::ToolExecuting { name, arguments, .. } => {
                    eprintln!("  -> {} {}", name, arguments);
                }
                LoopEvent::ToolResult { name, is_error: true, .. } => {
                    eprintln!("  !! {} failed", name);
                }
                LoopEvent::Finished { reason, steps } => {
                    tracing::debug!(?reason, steps, "Run finished");
                }
                _ => {}
            }
        }
    });
    tx
}

async fn build_engine(config: &BriefingConfig) -> Result<Arc<dyn ReasoningEngine>> {
    let engine = create_engine(&config.llm)?;
    if let Err(e) = engine.health_check().await {
        tracing::warn!("Engine {} health check failed: {}", engine.name(), e);
    }
    Ok(engine)
}

async fn serve(runtime: &BriefingRuntime) -> Result<()> {
    for name in runtime.supervisor().worker_names() {
        let launched = runtime.launched().get(&name).copied().unwrap_or(false);
        let connected = runtime.connected().get(&name).copied().unwrap_or(false);
        let status = match (launched, connected) {
            (true, true) => "connected",
            (true, false) => "running, no session",
            _ => "failed to start",
        };
        println!("{:<20} {}", name, status);
    }
    println!("{} tools available. Press Ctrl-C to stop.", runtime.registry().len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Stopping workers...");
    Ok(())
}

fn print_tools(runtime: &BriefingRuntime) {
    let tools = runtime.registry().list_tools();
    if tools.is_empty() {
        println!("No tools available.");
        return;
    }
    for tool in tools {
        println!("{:<24} [{}] {}", tool.name, tool.server, tool.description);
    }
}

async fn ask(agent: &AgentLoop, prompt: &str, json: bool) -> Result<bool> {
    let result = agent.run(prompt).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(response) = &result.response {
        println!("{}", response);
    } else {
        eprintln!(
            "Run failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(result.success)
}

async fn chat(agent: &AgentLoop) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Briefing chat ({} mode). Type 'exit' to quit.", agent.mode());
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }
        ask(agent, prompt, false).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file)?;

    let config = load_config(cli.config).await?;

    // Engine errors surface before any worker is launched
    let engine = match &cli.command {
        Commands::Ask { .. } | Commands::Chat { .. } => Some(build_engine(&config).await?),
        _ => None,
    };

    let runtime = BriefingRuntime::start(config).await?;

    let outcome = match (cli.command, engine) {
        (Commands::Serve, _) => serve(&runtime).await.map(|_| true),
        (Commands::Tools, _) => {
            print_tools(&runtime);
            Ok(true)
        }
        (Commands::Ask { prompt, mitigated, json }, Some(engine)) => {
            let mut agent = runtime.agent(engine, Mode::from_flag(mitigated));
            if !json {
                agent = agent.with_events(spawn_event_printer());
            }
            ask(&agent, &prompt, json).await
        }
        (Commands::Chat { mitigated }, Some(engine)) => {
            let agent = runtime
                .agent(engine, Mode::from_flag(mitigated))
                .with_events(spawn_event_printer());
            chat(&agent).await.map(|_| true)
        }
        (_, None) => Ok(true),
    };

    runtime.shutdown().await;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}
