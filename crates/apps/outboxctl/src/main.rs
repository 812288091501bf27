//! outboxctl - command line front end for the email outbox
//!
//! Every command prints a JSON response on stdout and exits non-zero
//! when the operation did not succeed.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use outbox::{NewEmail, OutboxService, OutboxSettings, Response, SmtpMailer, StorageKind};
use serde::Serialize;

/// Transactional email outbox
#[derive(Parser, Debug)]
#[command(name = "outboxctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to settings file (default: ~/.config/outbox/outbox.json)
    #[arg(short, long, global = true, env = "OUTBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Storage backend: sqlite (db) or filesystem (fs)
    #[arg(short, long, global = true)]
    storage: Option<StorageKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue an email read as JSON from a file, or "-" for stdin
    Enqueue {
        /// JSON file with the email
        file: String,
    },

    /// Delete an email from the outbox or sent items
    Delete {
        /// Email id as printed by enqueue
        id: String,
    },

    /// Deliver everything in the outbox
    Dispatch,

    /// List emails
    #[command(subcommand)]
    List(ListCommands),

    /// Manage settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ListCommands {
    /// Emails waiting to be sent
    Outbox,
    /// Emails already sent
    Sent,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write default settings to the config directory
    Init {
        /// Overwrite existing settings
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings
    Show,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();

    let mut settings = OutboxSettings::load_from(cli.config.as_deref())?;
    if let Some(storage) = cli.storage {
        settings.storage = storage;
    }

    match cli.command {
        Commands::Config(command) => run_config(command, &settings),
        command => run(command, &settings),
    }
}

fn run(command: Commands, settings: &OutboxSettings) -> Result<ExitCode> {
    let mailer = Arc::new(SmtpMailer::new(settings.smtp_timeout()));
    let service = OutboxService::open(settings, mailer)?;

    match command {
        Commands::Enqueue { file } => {
            let response = match read_email(&file)? {
                Ok(email) => service.enqueue(email)?,
                Err(message) => Response::failure(message),
            };
            print_response(&response, response.success)
        }
        Commands::Delete { id } => {
            let response = service.delete(&id)?;
            print_response(&response, response.success)
        }
        Commands::Dispatch => {
            let response = service.dispatch_all()?;
            print_response(&response, response.success)
        }
        Commands::List(ListCommands::Outbox) => {
            let response = service.list_outbox()?;
            print_response(&response, response.success)
        }
        Commands::List(ListCommands::Sent) => {
            let response = service.list_sent_items()?;
            print_response(&response, response.success)
        }
        Commands::Config(command) => run_config(command, settings),
    }
}

fn run_config(command: ConfigCommands, settings: &OutboxSettings) -> Result<ExitCode> {
    match command {
        ConfigCommands::Init { force } => {
            if let Some(path) = OutboxSettings::default_settings_path()
                && path.exists()
                && !force
            {
                let response = Response::failure(format!(
                    "Settings already exist at {} (use --force to overwrite)",
                    path.display()
                ));
                return print_response(&response, false);
            }

            let path = OutboxSettings::default().save()?;
            info!("Wrote default settings to {}", path.display());
            let response = Response::success(format!("Settings written to {}", path.display()));
            print_response(&response, true)
        }
        ConfigCommands::Show => print_response(settings, true),
    }
}

/// Read a `NewEmail` document; malformed JSON is an input error, not a crash
fn read_email(file: &str) -> Result<std::result::Result<NewEmail, String>> {
    let json = if file == "-" {
        let mut json = String::new();
        io::stdin()
            .read_to_string(&mut json)
            .context("Failed to read email from stdin")?;
        json
    } else {
        fs::read_to_string(Path::new(file))
            .with_context(|| format!("Failed to read email from {}", file))?
    };

    Ok(serde_json::from_str(&json).map_err(|e| format!("Invalid email JSON: {}", e)))
}

fn print_response<T: Serialize>(value: &T, success: bool) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
