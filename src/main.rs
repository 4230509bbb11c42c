//! bcryptfile - offline editor for bcrypt credential files
//!
//! Edits the file directly; a running service picks the changes up on reload.

use clap::{Parser, Subcommand};
use log::debug;
use std::path::{Path, PathBuf};

use authfile::config::AuthfileConfig;
use authfile::editor;
use authfile::error::handlers::{error_to_exit_code, handle_error};
use authfile::{AuthfileError, FileBackend};

#[derive(Parser, Debug)]
#[command(name = "bcryptfile", version, about = "Edit bcrypt password files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create FILE with COST
    #[command(alias = "i")]
    Init { file: PathBuf, cost: u32 },

    /// Add USERNAME; prompts for the password if not given
    #[command(alias = "a")]
    Add {
        file: PathBuf,
        username: String,
        password: Option<String>,
    },

    /// Delete USERNAME
    #[command(alias = "d")]
    Delete { file: PathBuf, username: String },

    /// Change the password of USERNAME; prompts for it if not given
    #[command(alias = "m")]
    Modify {
        file: PathBuf,
        username: String,
        password: Option<String>,
    },

    /// Change the cost recorded in FILE
    #[command(alias = "C")]
    Cost { file: PathBuf, cost: u32 },
}

fn main() {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        handle_error(&e);
        std::process::exit(error_to_exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<(), AuthfileError> {
    let config = AuthfileConfig::load()?;
    debug!("Using {:?}", config);

    match cli.command {
        Command::Init { file, cost } => editor::init_file(&file, cost, config.permissions)?,
        Command::Add {
            file,
            username,
            password,
        } => {
            let username = username.trim();
            let store = open(&file, &config)?;
            let password = resolve_password(password, username)?;
            editor::add_user(&store, username, &password)?;
        }
        Command::Delete { file, username } => {
            editor::delete_user(&open(&file, &config)?, username.trim())?;
        }
        Command::Modify {
            file,
            username,
            password,
        } => {
            let username = username.trim();
            let store = open(&file, &config)?;
            let password = resolve_password(password, username)?;
            editor::modify_user(&store, username, &password)?;
        }
        Command::Cost { file, cost } => editor::change_cost(&open(&file, &config)?, cost)?,
    }
    Ok(())
}

fn open(file: &Path, config: &AuthfileConfig) -> Result<FileBackend, AuthfileError> {
    Ok(FileBackend::open_existing(
        file,
        config.permissions,
        config.lock_timeout(),
    )?)
}

fn resolve_password(given: Option<String>, username: &str) -> Result<String, AuthfileError> {
    match given.map(|p| p.trim().to_string()) {
        Some(password) if !password.is_empty() => Ok(password),
        _ => Ok(ask_password(&format!(
            "Enter password for user \"{username}\""
        ))?),
    }
}

/// Prompts twice without echo until a non-empty, matching password is entered.
fn ask_password(prompt: &str) -> std::io::Result<String> {
    loop {
        let first = rpassword::prompt_password(format!("{prompt}: "))?;
        let first = first.trim().to_string();
        if first.is_empty() {
            println!("No password entered. Repeat.");
            continue;
        }
        let second = rpassword::prompt_password(format!("{prompt} (again): "))?;
        if first != second.trim() {
            println!("Passwords do not match. Repeat.");
            continue;
        }
        return Ok(first);
    }
}
