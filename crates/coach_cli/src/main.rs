//! Coach CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Provider error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// Script-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const PROVIDER_ERROR: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "coach=debug"
    } else if cli.quiet {
        "coach=error"
    } else {
        "coach=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in [default_level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Chat(args) => commands::chat::execute(args).await,
        Commands::Route(args) => commands::route::execute(args).await,
        Commands::Extract(args) => commands::extract::execute(args).await,
        Commands::Lookup(args) => commands::lookup::execute(args).await,
        Commands::Actions(args) => commands::actions::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let msg = format!("{:#}", e).to_lowercase();

    if msg.contains("llm") || msg.contains("provider") || msg.contains("generation") {
        ExitCodes::PROVIDER_ERROR
    } else if msg.contains("validation") || msg.contains("invalid directive") {
        ExitCodes::VALIDATION_FAILURE
    } else if msg.contains("argument") || msg.contains("unknown domain") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_error() {
        let llm = anyhow::Error::new(coach_chat::ChatError::LlmNotConfigured);
        assert_eq!(categorize_error(&llm), ExitCodes::PROVIDER_ERROR);

        let domain = anyhow::Error::new(coach_chat::ChatError::UnknownDomain("astro".to_string()));
        assert_eq!(categorize_error(&domain), ExitCodes::INVALID_ARGS);

        let invalid = anyhow::anyhow!("2 directive(s) failed validation");
        assert_eq!(categorize_error(&invalid), ExitCodes::VALIDATION_FAILURE);

        assert_eq!(categorize_error(&anyhow::anyhow!("disk full")), ExitCodes::GENERAL_ERROR);
    }
}
