//! Chat command - Talk to the coach.
//!
//! Without `--message` this runs an interactive loop reading stdin. Lines
//! starting with `/` are session commands:
//! `/switch <domain>`, `/confirm <id>`, `/reject <id>`, `/retry <id>`, `/quit`.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use coach_chat::{
    ActionOutcome, CoachSession, DispatchEvent, Domain, Generator, KnowledgeLookup, LlmAdapter, SessionBackend,
    TurnOutcome,
};

use super::SessionOptions;

#[derive(Args)]
pub struct ChatArgs {
    /// Send a single message and exit
    #[arg(short, long)]
    message: Option<String>,

    /// Start in this domain thread
    #[arg(short, long)]
    domain: Option<String>,

    /// Confirm every action without asking
    #[arg(short, long)]
    yes: bool,

    #[command(flatten)]
    session: SessionOptions,
}

pub async fn execute(args: ChatArgs) -> Result<()> {
    let config = args.session.load_config()?;
    let generator: Arc<dyn Generator> = Arc::new(LlmAdapter::from_config(&config.llm)?);
    info!("Using model {}", generator.model());

    let lookup = Arc::new(KnowledgeLookup::from_config(&config.lookup, Some(generator.clone())));
    let backend = SessionBackend::from_data_store(args.session.data_store(), args.session.session_storage());
    let session = CoachSession::new(config, generator, backend).with_lookup(lookup);

    let hydration = session.hydrate().await?;
    info!("Session hydration: {:?}", hydration);

    if let Some(domain) = &args.domain {
        session.switch_domain(domain.parse::<Domain>()?);
    }

    if let Some(message) = &args.message {
        let outcome = send(&session, message).await?;
        handle_actions(&session, &outcome, args.yes).await?;
        return Ok(());
    }

    let locale = session.config().preferences.locale;
    println!("💬 Coach ({}) - /quit to exit", session.active_domain().display_name(locale));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !run_command(&session, command).await? {
                break;
            }
            continue;
        }

        match send(&session, line).await {
            Ok(outcome) => handle_actions(&session, &outcome, args.yes).await?,
            Err(e) => println!("❌ {}", e),
        }
    }

    Ok(())
}

/// Send one message, printing the reply as it streams.
async fn send(session: &CoachSession, text: &str) -> Result<TurnOutcome> {
    let (tx, mut rx) = mpsc::channel(64);

    let printer = tokio::spawn(async move {
        let mut shown = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Chunk { content, .. } => {
                    match content.strip_prefix(shown.as_str()) {
                        Some(delta) => print!("{}", delta),
                        None => print!("\n{}", content),
                    }
                    shown = content;
                }
                DispatchEvent::Merged { content } => {
                    print!("\n\n{}", content);
                    shown = content;
                }
            }
            let _ = std::io::stdout().flush();
        }
        println!();
    });

    let outcome = session.send_message(text, Some(tx)).await?;
    printer.await?;

    if outcome.reply.errored {
        println!("⚠️  {}", outcome.reply.content);
    }
    for error in &outcome.rejected_directives {
        println!("   ⚠️  Ignored invalid directive: {}", error);
    }
    if let Some(attribution) = &outcome.reply.attribution {
        println!("   {} {}", attribution.icon, attribution.display_name);
    }

    Ok(outcome)
}

async fn handle_actions(session: &CoachSession, outcome: &TurnOutcome, confirm_all: bool) -> Result<()> {
    for action in &outcome.reply.actions {
        if confirm_all {
            let result = session.confirm_action(&action.id).await?;
            print_outcome(&action.id, &result);
        } else {
            println!("   📌 [{}] {}", action.id, action.describe());
        }
    }
    if !confirm_all && !outcome.reply.actions.is_empty() {
        println!("   Use /confirm <id> or /reject <id>");
    }
    Ok(())
}

/// Run a slash command. Returns false when the loop should end.
async fn run_command(session: &CoachSession, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default();

    let result = match name {
        "quit" | "exit" => return Ok(false),
        "switch" => match argument.parse::<Domain>() {
            Ok(domain) => {
                session.switch_domain(domain);
                println!("🔀 Now in {}", domain.display_name(session.config().preferences.locale));
                return Ok(true);
            }
            Err(e) => Err(e),
        },
        "confirm" => session.confirm_action(argument).await,
        "retry" => session.retry_action(argument).await,
        "reject" => session.reject_action(argument),
        "dismiss" => session.dismiss_action(argument),
        other => {
            println!("❓ Unknown command: /{}", other);
            return Ok(true);
        }
    };

    match result {
        Ok(outcome) => print_outcome(argument, &outcome),
        Err(e) => println!("❌ {}", e),
    }
    Ok(true)
}

fn print_outcome(action_id: &str, outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Executed => println!("   ✅ Saved ({})", action_id),
        ActionOutcome::Failed(error) => println!("   ❌ Failed ({}): {} - use /retry", action_id, error),
        ActionOutcome::Rejected => println!("   🗑️  Rejected ({})", action_id),
        ActionOutcome::Dismissed => println!("   🗑️  Dismissed ({})", action_id),
        ActionOutcome::Ignored => println!("   ⏭️  Nothing to do for {}", action_id),
    }
}
