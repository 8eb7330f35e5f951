//! Forka CLI
//!
//! Command-line interface for the Forka group bot

mod console;
mod logging;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use console::{address_for, render_outbound, ConsoleFixture, ConsoleInput, ConsolePlatform, ConsoleSession};
use forka_config::Config;
use forka_core::{Dispatcher, Runtime};
use forka_identity::CanonicalId;
use forka_ipc::{Envelope, EventBus};
use forka_storage::{BotMode, SettingsStore, Storage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

const DB_FILE: &str = "forka.db";
const CONSOLE_CHANNEL: &str = "console";
const FALLBACK_CONSOLE_SENDER: &str = "10001@s.whatsapp.net";

#[derive(Parser)]
#[command(name = "forka")]
#[command(about = "Group management bot with owner, sudo and admin permissions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the bot from the terminal
    Console {
        /// TOML file with the agent address and group metadata
        #[arg(short, long)]
        fixture: Option<PathBuf>,
        /// Number or address to type as (defaults to the first owner)
        #[arg(short = 'a', long = "as")]
        sender: Option<String>,
        /// Group id to start in
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Public/private mode
    Mode {
        #[command(subcommand)]
        action: ModeCommands,
    },

    /// Sudo users
    Sudo {
        #[command(subcommand)]
        action: SudoCommands,
    },

    /// Log management commands
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration
    Check,
    /// Show the effective configuration
    Show,
}

#[derive(Subcommand)]
enum ModeCommands {
    /// Show the current mode
    Get,
    /// Switch to public or private
    Set { mode: String },
}

#[derive(Subcommand)]
enum SudoCommands {
    /// List sudo users
    List,
    /// Grant sudo to a number
    Add { number: String },
    /// Revoke sudo from a number
    Remove { number: String },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Delete old logs
    Clean {
        /// Keep only N days of logs
        #[arg(short, long, default_value = "7")]
        days: u64,
    },
    /// Show last N lines of today's log
    Tail {
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Console {
            fixture,
            sender,
            group,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let data_dir = config.data_dir()?;
            let level = log_level(cli.log_level.as_deref(), &config);
            let _logging_guard = logging::init_logging(&data_dir.join("logs"), &level)?;
            run_console(config, fixture.as_deref(), sender.as_deref(), group).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Init { force } => {
                let path = config_path(cli.config.as_deref())?;
                init_config(&path, force)?;
                println!("Configuration written to {}", path.display());
            }
            ConfigCommands::Check => match load_config(cli.config.as_deref()) {
                Ok(config) => {
                    println!("Configuration is valid.");
                    println!("  name     : {}", config.bot.name);
                    println!("  prefix   : {}", config.bot.prefix);
                    let owners = config.bot.owner_numbers();
                    if owners.is_empty() {
                        println!("  owners   : none (owner commands are disabled)");
                    } else {
                        println!("  owners   : {}", owners.join(", "));
                    }
                    println!("  data dir : {}", config.data_dir()?.display());
                }
                Err(e) => {
                    eprintln!("Configuration is invalid: {}", e);
                    std::process::exit(1);
                }
            },
            ConfigCommands::Show => {
                let config = load_config(cli.config.as_deref())?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },

        Commands::Mode { action } => {
            let config = load_config(cli.config.as_deref())?;
            let mut storage = open_storage(&config)?;
            match action {
                ModeCommands::Get => println!("Mode: {}", storage.mode()?),
                ModeCommands::Set { mode } => {
                    let mode: BotMode = mode.parse()?;
                    storage.set_mode(mode)?;
                    println!("Mode set to {}", mode);
                }
            }
        }

        Commands::Sudo { action } => {
            let config = load_config(cli.config.as_deref())?;
            let mut storage = open_storage(&config)?;
            match action {
                SudoCommands::List => {
                    let users = storage.sudo_users()?;
                    if users.is_empty() {
                        println!("No sudo users.");
                    }
                    for id in users {
                        match storage.sudo_granted_by(&id)? {
                            Some(by) => println!("  {} (granted by {})", id, by),
                            None => println!("  {}", id),
                        }
                    }
                }
                SudoCommands::Add { number } => {
                    let id = parse_number(&number)?;
                    if storage.add_sudo(&id, None)? {
                        println!("{} is now sudo", id);
                    } else {
                        println!("{} was already sudo", id);
                    }
                }
                SudoCommands::Remove { number } => {
                    let id = parse_number(&number)?;
                    if storage.remove_sudo(&id)? {
                        println!("{} is no longer sudo", id);
                    } else {
                        println!("{} was not sudo", id);
                    }
                }
            }
        }

        Commands::Logs { action } => {
            let config = load_config(cli.config.as_deref())?;
            let manager = logging::LogManager::new(config.data_dir()?.join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.log_files()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(manager.total_size()?)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let deleted = manager.cleanup_older_than(days)?;
                    println!("Cleaned {} old log file(s)", deleted);
                }
                LogCommands::Tail { lines } => {
                    let current_log = manager.current_log_path();
                    if current_log.exists() {
                        let content = fs::read_to_string(&current_log)?;
                        let all_lines: Vec<&str> = content.lines().collect();
                        let start = all_lines.len().saturating_sub(lines);
                        for line in &all_lines[start..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current_log.display());
                    }
                }
            }
        }
    }

    Ok(())
}

fn config_path(explicit: Option<&str>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::default_path().ok_or_else(|| anyhow!("No config directory found")),
    }
}

/// An explicit path must exist; the default path falls back to defaults.
fn load_config(explicit: Option<&str>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path)),
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(path),
            None => Config::load_or_default(Path::new("forka.toml")),
        },
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, Config::template())?;
    Ok(())
}

fn log_level(explicit: Option<&str>, config: &Config) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| config.core.log_level.clone())
        .unwrap_or_else(|| "info".to_string())
}

fn open_storage(config: &Config) -> Result<Storage> {
    let data_dir = config.data_dir()?;
    fs::create_dir_all(&data_dir)?;
    Storage::new(data_dir.join(DB_FILE))
}

fn parse_number(value: &str) -> Result<CanonicalId> {
    CanonicalId::from_number(value).ok_or_else(|| anyhow!("'{}' is not a phone number", value))
}

async fn run_console(
    config: Config,
    fixture: Option<&Path>,
    sender: Option<&str>,
    group: Option<String>,
) -> Result<()> {
    let fixture = match fixture {
        Some(path) => ConsoleFixture::load(path)?,
        None => ConsoleFixture::default(),
    };
    let storage = open_storage(&config)?;

    let sender = match sender {
        Some(value) => address_for(value).ok_or_else(|| anyhow!("'{}' is not a number or address", value))?,
        None => config
            .bot
            .owner_numbers()
            .first()
            .and_then(|owner| address_for(owner))
            .unwrap_or_else(|| FALLBACK_CONSOLE_SENDER.to_string()),
    };

    let bus = EventBus::new();
    let platform = Arc::new(ConsolePlatform::new(fixture, bus.outbound_sender()));
    let groups = platform.group_ids().await;
    let group = group.or_else(|| groups.first().cloned());
    let dispatcher = Dispatcher::new(&config, platform, Box::new(storage))?;
    let runtime = Runtime::new(&bus, dispatcher);

    let mut output = bus.outbound_subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match output.recv().await {
                Ok(message) => println!("{}", render_outbound(&message)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console output lagged by {} messages", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    let runner = tokio::spawn(runtime.run());

    let mut session = ConsoleSession::new(sender, group);
    println!(
        "{} console. Typing as {} in {}. /help for directives.",
        config.bot.name,
        session.sender(),
        session.conversation_id()
    );
    if !groups.is_empty() {
        println!("Groups: {}", groups.join(", "));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        match session.interpret(&line) {
            ConsoleInput::Message(message) => {
                bus.publish(Envelope::message(CONSOLE_CHANNEL, message))?;
            }
            ConsoleInput::Notice(text) => println!("{}", text),
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => break,
        }
    }

    info!("Console input closed, draining pending messages");
    drop(bus);
    let dispatcher = runner.await?;
    drop(dispatcher);
    printer.await?;
    Ok(())
}
