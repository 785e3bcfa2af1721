mod config;
mod db;
mod error;
mod llm;
mod server;
mod shell;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

/// AI-assisted SQL query optimizer for MySQL and PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file
    config_file: PathBuf,

    /// Command to run
    #[arg(value_enum, default_value = "shell")]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Command {
    /// Interactive query shell (default)
    Shell,
    /// HTTP API for the web UI
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config_file)?;

    // Resolve a missing database password: env var first, then a prompt.
    if config.database.password.is_empty() {
        if let Ok(password) = std::env::var("QOPT_DB_PASSWORD") {
            config.database.password = password;
        } else {
            let prompt = format!("Password for {}: ", config.database.display_string());
            config.database.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    match cli.command {
        Command::Shell => shell::run(config).await,
        Command::Serve => server::run(config).await,
    }
}
