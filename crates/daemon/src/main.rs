//! davgate
//!
//! Access policy daemon for a file-serving protocol engine.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{find_config_file, ConfigFile, LogConfig, ServerConfig};
use daemon::{ConfigStore, ConfigWatcher};
use tracing_subscriber::EnvFilter;

/// davgate - authentication, CRUD permissions and per-user jails for WebDAV.
#[derive(Parser, Debug)]
#[command(name = "davgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration file and print a summary
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load the configuration and hot-reload it until interrupted
    Watch,

    /// Print a salted password hash for the configuration file
    Hash {
        /// Password to hash (read from stdin when omitted)
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash { password } => {
            init_tracing(cli.verbose, &LogConfig::default());
            hash(password)
        }
        Commands::Check { json } => {
            let config_path = prepare(cli.config, cli.verbose)?;
            check(&config_path, json)
        }
        Commands::Watch => {
            let config_path = prepare(cli.config, cli.verbose)?;
            run_watch(config_path).await
        }
    }
}

/// Locate the configuration file and initialize logging from its settings.
fn prepare(explicit: Option<PathBuf>, verbose: bool) -> anyhow::Result<PathBuf> {
    let config_path = find_config_file(explicit.as_deref())?;

    // Logging settings are needed before the strict load can report anything.
    let log = ConfigFile::read(&config_path)
        .map(|file| file.log)
        .unwrap_or_default();
    init_tracing(verbose, &log);
    tracing::debug!(production = log.production, debug = log.debug, "Logging initialized");
    tracing::info!(path = %config_path.display(), "Using config file");

    Ok(config_path)
}

fn check(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = ServerConfig::load(config_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summarize(&config))?);
    } else {
        print_summary(&config);
    }
    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the level.
fn init_tracing(verbose: bool, log: &LogConfig) {
    let level = if verbose || log.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if log.production {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn hash(password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password(io::stdin().lock())?,
    };
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    let hash = policy::hash_password(&password).context("Failed to hash password")?;
    println!("{hash}");
    Ok(())
}

/// Read one line from `reader` without its line ending.
fn read_password<R: BufRead>(mut reader: R) -> anyhow::Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Load the configuration, keep it current and wait for shutdown.
async fn run_watch(config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!("davgate starting...");

    let store = Arc::new(ConfigStore::load(&config_path)?);
    let config = store.snapshot();
    config.ensure_directories()?;

    let security = if config.tls.is_some() { "TLS" } else { "none" };
    tracing::info!(
        address = %config.address,
        port = config.port,
        security,
        users = config.users.len(),
        authentication = config.authentication_needed(),
        "Access policy loaded"
    );

    let watcher = ConfigWatcher::spawn(Arc::clone(&store))?;

    wait_for_signals(Arc::clone(&store)).await?;
    tracing::info!("Received shutdown signal");

    watcher.stop().await;
    Ok(())
}

/// Wait for SIGTERM or SIGINT. SIGHUP forces a reload of the config file.
async fn wait_for_signals(store: Arc<ConfigStore>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                return Ok(());
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
                return Ok(());
            }
            _ = sighup.recv() => {
                tracing::info!("Received SIGHUP, reloading config file");
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.reload()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Failed to reload config file, keeping previous configuration");
                    }
                    Err(e) => tracing::error!(error = %e, "Reload task failed"),
                }
            }
        }
    }
}

/// Summary of a configuration without secrets.
fn summarize(config: &ServerConfig) -> serde_json::Value {
    let users: Vec<_> = config
        .users
        .values()
        .map(|user| {
            serde_json::json!({
                "username": user.username,
                "subdir": user.jail_subdir,
                "permissions": user.permissions,
            })
        })
        .collect();

    serde_json::json!({
        "address": config.address,
        "port": config.port,
        "prefix": config.prefix,
        "dir": config.dir,
        "tls": config.tls.is_some(),
        "realm": config.realm,
        "cors": config.cors,
        "log": config.log,
        "authentication": config.authentication_needed(),
        "users": users,
    })
}

fn print_summary(config: &ServerConfig) {
    println!("Configuration OK");
    println!();
    println!("  Listen:   {}:{}", config.address, config.port);
    println!(
        "  TLS:      {}",
        if config.tls.is_some() { "enabled" } else { "disabled" }
    );
    println!("  Prefix:   {}", if config.prefix.is_empty() { "/" } else { &config.prefix });
    println!("  Dir:      {}", config.dir.display());
    println!("  Realm:    {}", config.realm);

    if !config.authentication_needed() {
        println!();
        println!("No users configured, authentication is disabled.");
        return;
    }

    println!();
    println!("{:<20} {:<6} SUBDIR", "USER", "CRUD");
    println!("{}", "-".repeat(40));
    for user in config.users.values() {
        println!(
            "{:<20} {:<6} {}",
            user.username,
            user.permissions.raw(),
            user.jail_subdir.as_deref().unwrap_or("-")
        );
    }
}
