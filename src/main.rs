use std::path::PathBuf;

use anyhow::Context;
use axum::extract::FromRef;
use clap::{Parser, Subcommand};
use directories_next::ProjectDirs;
use tracing_subscriber::EnvFilter;

mod clock;
mod config;
mod controllers {
    pub mod paste;
}
mod error;
mod models;
mod pages;
mod storage;
mod types;

mod commands {
    pub mod purge_expired;
    pub mod serve;
}

pub(crate) use error::{AppError, AppResult};

use config::Config;
use storage::AnyStore;

#[derive(Parser)]
#[command(version, about = "A paste bin whose pastes expire by time or by views")]
struct Cli {
    /// Path to the config file.
    #[arg(short, long, env = "FADEBIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the paste API and pages.
    Serve,
    /// Delete pastes that can no longer be viewed, then exit.
    PurgeExpired,
}

#[derive(Clone, FromRef)]
pub struct App {
    pub config: Config,
    pub store: AnyStore,
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "fadebin")
        .context("could not determine the config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)?;

    let store = AnyStore::open(&config)
        .await
        .context("failed to open paste storage")?;

    let app = App { config, store };

    match cli.command {
        Command::Serve => commands::serve::run(app).await,
        Command::PurgeExpired => commands::purge_expired::run(app).await,
    }
}
