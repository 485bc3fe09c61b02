use anyhow::{Context, Result};
use clap::Parser;
use lantern_config::{ConfigLoader, LanternConfig};
use lantern_extensions::{
    ExtensionId, ExtensionManifest, ExtensionRuntime, InMemoryPreferences, RuntimeHandle,
    UiEvent,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

mod cli;
use cli::{Cli, Commands};

fn load_config(config_path: Option<&PathBuf>) -> Result<LanternConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Keep the returned guard alive while logging to a file
fn init_logging(
    config: &LanternConfig,
    log_level: Option<&String>,
) -> Result<Option<lantern_logging::WorkerGuard>> {
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        match level_str.parse() {
            Ok(level) => logging_config.level = level,
            Err(_) => eprintln!(
                "Invalid log level '{}', keeping {}",
                level_str,
                logging_config.level.as_str()
            ),
        }
    }

    match lantern_logging::init_logging_from_config(&logging_config) {
        Ok(guard) => {
            debug!("Structured logging initialized");
            Ok(guard)
        }
        Err(e) => {
            eprintln!(
                "Failed to initialize structured logging: {}, falling back to simple tracing",
                e
            );
            lantern_logging::init_simple_tracing(logging_config.level.as_str())?;
            Ok(None)
        }
    }
}

/// Run the host until stdin closes, `:quit` or Ctrl-C
async fn serve_command(config: LanternConfig, no_run: bool) -> Result<()> {
    let (handle, mut ui, task) =
        ExtensionRuntime::spawn(&config, Box::new(InMemoryPreferences::new()));

    handle
        .start_server()
        .await
        .context("Failed to start extension server")?;
    println!(
        "🔌 Listening for extensions on {}",
        config.runtime.socket_path.display()
    );

    if !no_run {
        let started = handle.run_all().await?;
        info!("Started {} extensions", started.len());
        for ext_id in &started {
            println!("🚀 Started {}", ext_id);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if !handle_input(&handle, line.trim_end()).await? {
                    break;
                }
            }
            Some(event) = ui.recv() => print_ui_event(&event),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    task.await.context("Extension runtime task failed")?;
    println!("👋 Stopped");
    Ok(())
}

/// Returns false when the user asked to quit
async fn handle_input(handle: &RuntimeHandle, line: &str) -> Result<bool> {
    let Some(command) = line.strip_prefix(':') else {
        if line.trim().is_empty() {
            handle.query_changed().await?;
        } else if handle.handle_query(line).await?.is_none() {
            println!("No extension handles '{}'", line);
        }
        return Ok(true);
    };

    let (name, argument) = command.split_once(' ').unwrap_or((command, ""));
    let ext_id = ExtensionId::new(argument.trim());
    match name {
        "quit" | "q" => return Ok(false),
        "status" => {
            let status = handle.status().await?;
            match &status.socket_path {
                Some(path) => println!("socket: {}", path.display()),
                None => println!("socket: not listening"),
            }
            for (ext_id, uptime) in &status.running {
                let state = if status.connected.contains(ext_id) {
                    "connected"
                } else {
                    "starting"
                };
                println!("  {} ({}, up {:?})", ext_id, state, uptime);
            }
            if status.pending_connections > 0 {
                println!("  {} unregistered connections", status.pending_connections);
            }
        }
        "run" => report(handle.run(ext_id.clone()).await, "Started", &ext_id),
        "stop" => report(handle.stop(ext_id.clone()).await, "Stopped", &ext_id),
        "reload" => {
            for (ext_id, outcome) in handle.reload([ext_id]).await? {
                report(outcome, "Reloaded", &ext_id);
            }
        }
        "error" => match handle.get_error(ext_id.clone()).await? {
            Some(error) => println!("{}: {}", ext_id, error),
            None => println!("{}: no error recorded", ext_id),
        },
        other => println!("Unknown command ':{}'", other),
    }
    Ok(true)
}

fn report(outcome: lantern_extensions::RuntimeResult<()>, verb: &str, ext_id: &ExtensionId) {
    match outcome {
        Ok(()) => println!("✅ {} {}", verb, ext_id),
        Err(e) => println!("❌ {}", e),
    }
}

fn print_ui_event(event: &UiEvent) {
    match event {
        UiEvent::ShowResults { ext_id, results } => {
            println!("[{}] {} results", ext_id, results.len());
            for item in results {
                if item.description.is_empty() {
                    println!("  {}", item.name);
                } else {
                    println!("  {}: {}", item.name, item.description);
                }
            }
        }
        UiEvent::RunAction { ext_id, action } => {
            let action = serde_json::to_string(action).unwrap_or_else(|_| format!("{:?}", action));
            println!("[{}] action {}", ext_id, action);
        }
        UiEvent::Hide => println!("(window hidden)"),
    }
}

fn check_command(config: &LanternConfig, path: &Path) -> Result<()> {
    let manifest = ExtensionManifest::load(path)
        .with_context(|| format!("Failed to load manifest from {}", path.display()))?;
    manifest.validate().context("Manifest is invalid")?;
    manifest
        .check_compatibility(&config.extensions.host_api_version)
        .context("Extension is incompatible")?;

    let dir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or(path)
    };
    let ext_id = ExtensionId::from_dir(dir)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    println!("✅ {} ({}) is valid", manifest.name, ext_id);
    for (trigger_id, trigger) in &manifest.triggers {
        if trigger.keyword.is_empty() {
            println!("  {}: {} (launch only)", trigger_id, trigger.name);
        } else {
            println!("  {}: {} [{}]", trigger_id, trigger.name, trigger.keyword);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if cli.verbose {
        config.extensions.verbose = true;
    }
    let _guard = init_logging(&config, cli.log_level.as_ref())?;

    match cli.command {
        Commands::Serve { no_run } => {
            info!("Lantern host starting");
            serve_command(config, no_run).await
        }
        Commands::Check { path } => check_command(&config, &path),
        Commands::Id { source } => {
            let ext_id = ExtensionId::parse_source(&source)?;
            println!("{}", ext_id);
            Ok(())
        }
        Commands::Config { sample } => {
            if sample {
                print!("{}", LanternConfig::generate_sample());
            } else {
                let yaml =
                    serde_yaml::to_string(&config).context("Failed to serialize to YAML")?;
                print!("{}", yaml);
            }
            Ok(())
        }
    }
}
