//! Hinata CLI - Database migrations and maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! hinata migrate
//!
//! # Delete expired passkey challenges
//! hinata purge-challenges
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "hinata")]
#[command(author, version, about = "Hinata storefront CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Delete passkey challenges past their expiry
    PurgeChallenges,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), commands::CommandError> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::PurgeChallenges => commands::maintenance::purge_challenges().await?,
    }
    Ok(())
}
