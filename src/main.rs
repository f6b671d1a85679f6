mod app;
mod backend;
mod cache;
mod commands;
mod config;
mod connectivity;
mod error;
mod event;
mod format;
mod logging;
mod notify;
mod optimistic;
mod paginated;
mod query;
mod session;
mod view;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;

use crate::session::Role;

#[derive(Parser, Debug)]
#[command(name = "rentdesk")]
#[command(about = "A terminal console for landlords, property managers and tenants")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rentdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Role of the signed-in account
  #[arg(short, long, value_enum)]
  role: Option<Role>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override role if specified on command line
  let config = if let Some(role) = args.role {
    config::Config {
      role: Some(role),
      ..config
    }
  } else {
    config
  };
  info!(backend = %config.backend.url, role = ?config.role, "starting");

  // Initialize and run the app
  let mut app = app::App::new(config)?;
  app.run().await?;

  Ok(())
}
