//! Route command - Show how a message would be routed.

use anyhow::Result;
use clap::Args;

use coach_chat::{IntentRouter, Locale, RoutingDecision};

use super::SessionOptions;

#[derive(Args)]
pub struct RouteArgs {
    /// Message to classify
    message: String,

    /// Return every domain that clears the threshold
    #[arg(short, long)]
    multi: bool,

    /// Print the decision as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    session: SessionOptions,
}

pub async fn execute(args: RouteArgs) -> Result<()> {
    let config = args.session.load_config()?;
    let router = IntentRouter::new(config.router);

    let decisions = if args.multi {
        router.classify_multi(&args.message).decisions
    } else {
        vec![router.classify(&args.message)]
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        return Ok(());
    }

    println!("🧭 Routing: \"{}\"", args.message);
    for (rank, decision) in decisions.iter().enumerate() {
        print_decision(rank, decision, config.preferences.locale);
    }

    Ok(())
}

fn print_decision(rank: usize, decision: &RoutingDecision, locale: Locale) {
    let role = if rank == 0 { "primary" } else { "secondary" };
    println!(
        "   {} {} ({}) - confidence {:.2} [{}]",
        decision.domain.icon(),
        decision.domain.display_name(locale),
        decision.domain,
        decision.confidence,
        role
    );
    if decision.matched_keywords.is_empty() {
        println!("      no keywords matched");
    } else {
        println!("      matched: {}", decision.matched_keywords.join(", "));
    }
}
