//! Actions command - Manage pending actions from earlier sessions.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};

use coach_chat::{ActionController, ActionOutcome, ActionStatus, Domain, ThreadStore};

use super::SessionOptions;

#[derive(Args)]
pub struct ActionsArgs {
    #[command(subcommand)]
    command: ActionCommand,

    #[command(flatten)]
    session: SessionOptions,
}

#[derive(Subcommand)]
enum ActionCommand {
    /// List pending and failed actions
    List,
    /// Execute a pending action
    Confirm { id: String },
    /// Execute a failed action again
    Retry { id: String },
    /// Drop a pending action
    Reject { id: String },
    /// Hide an action
    Dismiss { id: String },
}

pub async fn execute(args: ActionsArgs) -> Result<()> {
    let config = args.session.load_config()?;
    let storage = args.session.session_storage();
    let store = Arc::new(ThreadStore::new(&config.threads));
    store.restore_from(storage.as_ref())?;

    let controller = ActionController::new(store.clone(), args.session.data_store());
    let locale = config.preferences.locale;

    let outcome = match &args.command {
        ActionCommand::List => {
            let mut count = 0;
            for domain in Domain::ALL {
                for message in store.messages(domain) {
                    for action in &message.actions {
                        count += 1;
                        let marker = match action.status {
                            ActionStatus::Failed => "❌",
                            _ => "📌",
                        };
                        println!(
                            "{} [{}] {} {} - {} ({})",
                            marker,
                            action.id,
                            domain.icon(),
                            domain.display_name(locale),
                            action.describe(),
                            action.status
                        );
                        if let Some(error) = &action.error {
                            println!("      {}", error);
                        }
                    }
                }
            }
            if count == 0 {
                println!("📭 No open actions");
            }
            return Ok(());
        }
        ActionCommand::Confirm { id } => controller.confirm(id).await?,
        ActionCommand::Retry { id } => controller.retry(id).await?,
        ActionCommand::Reject { id } => controller.reject(id)?,
        ActionCommand::Dismiss { id } => controller.dismiss(id)?,
    };

    store.save_to(storage.as_ref())?;

    match outcome {
        ActionOutcome::Executed => println!("✅ Action executed"),
        ActionOutcome::Failed(error) => anyhow::bail!("action failed: {}", error),
        ActionOutcome::Rejected => println!("🗑️  Action rejected"),
        ActionOutcome::Dismissed => println!("🗑️  Action dismissed"),
        ActionOutcome::Ignored => println!("⏭️  Action is not in a state this applies to"),
    }

    Ok(())
}
