//! Specialist Router - command line entry point
//!
//! `run` opens one interactive session over stdin, `classify` shows which
//! specialist a request would reach, `config` validates the registry.

use clap::{Parser, Subcommand};
use specialist_router::config::RouterConfig;
use specialist_router::handler::{EchoHandler, HandlerSet};
use specialist_router::observability::{init_default_logging, metrics};
use specialist_router::routing::RouterCore;
use specialist_router::session::SessionManager;
use specialist_router::workflow::WorkflowState;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Deterministic specialist request router
#[derive(Parser)]
#[command(name = "specialist-router")]
#[command(about = "Route requests to exactly one specialist handler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route stdin lines through one session
    Run {
        /// Print full responses, including the decision trail, as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the routing decision for a request without invoking handlers
    Classify {
        /// Request text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!(
        "Starting specialist-router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { json } => run_session(config, json).await,
        Commands::Classify { text } => classify(config, &text.join(" ")),
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RouterConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["router.toml", "config/router.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RouterConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found; using built-in registry");
            Ok(RouterConfig::builtin()?)
        }
    }
}

/// Echo specialists for every registered id
fn build_core(config: &RouterConfig) -> Result<RouterCore, Box<dyn std::error::Error>> {
    let mut handlers = HandlerSet::new();
    for entry in &config.handlers {
        handlers.insert(Arc::new(
            EchoHandler::new(entry.id, &entry.display_name)
                .with_brief_ready_marker(&config.router.brief_ready_marker),
        ));
    }
    Ok(RouterCore::from_config(config, handlers)?)
}

async fn run_session(config: RouterConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut sessions = SessionManager::new(build_core(&config)?);
    let mut session = sessions.start_session();

    eprintln!("Type a request per line. Commands: :state, :metrics, :end, :quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" => break,
            ":end" => {
                sessions.end_session(session)?;
                session = sessions.start_session();
                println!("session reset");
            }
            ":state" => {
                let snapshot = sessions.state(session)?.snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            ":metrics" => {
                println!("{}", serde_json::to_string_pretty(&metrics().snapshot())?);
            }
            text => {
                let response = sessions.route(session, text).await?;
                if json {
                    println!("{}", serde_json::to_string(&response)?);
                } else {
                    let handler = response
                        .handled_by
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("[{handler}] {}", response.content);
                }
            }
        }
    }

    sessions.end_session(session)?;
    info!("Session closed");
    Ok(())
}

fn classify(config: RouterConfig, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let core = build_core(&config)?;
    let decision = core.classifier().classify_text(text, &WorkflowState::new())?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn handle_config_command(config: RouterConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current router configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!(
        handlers = config.handlers.len(),
        max_hops = config.router.max_hops,
        "Configuration validation complete"
    );
    Ok(())
}
