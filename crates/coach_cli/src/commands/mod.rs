//! CLI command definitions.
//!
//! Each subcommand maps to one part of the coaching pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use coach_chat::{CoachConfig, FileDataStore, FileStorage};

pub mod actions;
pub mod chat;
pub mod extract;
pub mod lookup;
pub mod route;

/// Coach - multi-agent health and fitness coaching
#[derive(Parser)]
#[command(name = "coach")]
#[command(version, about = "Coach - multi-agent health and fitness coaching")]
#[command(long_about = r#"
Coach routes each message to domain agents (nutrition, training, substances,
analytics, medical, recovery, lifestyle), streams their replies and turns the
commands embedded in them into actions you confirm before anything is saved.

COMMANDS:
  chat     → Talk to the coach (interactive or one message)
  route    → Show how a message would be routed
  extract  → Extract and validate directive blocks from text
  lookup   → Resolve a product's nutrition facts
  actions  → List, confirm or reject pending actions

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Provider error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Chat with the coach
    Chat(chat::ChatArgs),

    /// Classify a message without calling any agent
    Route(route::RouteArgs),

    /// Extract and validate directive blocks
    Extract(extract::ExtractArgs),

    /// Look up a product in the product database
    Lookup(lookup::LookupArgs),

    /// Manage pending actions
    Actions(actions::ActionsArgs),
}

/// Options shared by commands that read configuration or session data.
#[derive(Args, Clone)]
pub struct SessionOptions {
    /// Configuration file (TOML)
    #[arg(short, long, env = "COACH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding history, tables and the session cache
    #[arg(long, env = "COACH_DATA_DIR", default_value = ".coach")]
    pub data_dir: PathBuf,
}

impl SessionOptions {
    pub fn load_config(&self) -> Result<CoachConfig> {
        CoachConfig::load_or_default(self.config.as_deref())
            .with_context(|| format!("failed to load configuration from {:?}", self.config))
    }

    pub fn data_store(&self) -> Arc<FileDataStore> {
        Arc::new(FileDataStore::new(&self.data_dir))
    }

    pub fn session_storage(&self) -> Arc<FileStorage> {
        Arc::new(FileStorage::new(self.data_dir.join("session")))
    }
}
