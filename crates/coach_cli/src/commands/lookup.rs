//! Lookup command - Resolve a product's nutrition facts.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::debug;

use coach_chat::{Generator, KnowledgeLookup, LlmAdapter, LookupSource};

use super::SessionOptions;

#[derive(Args)]
pub struct LookupArgs {
    /// Product to look up, e.g. "Kölln Hafermüsli Früchte"
    query: String,

    /// Amount eaten in grams (or ml); defaults to the product's serving
    #[arg(short, long)]
    amount: Option<f64>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    session: SessionOptions,
}

pub async fn execute(args: LookupArgs) -> Result<()> {
    let config = args.session.load_config()?;

    let fallback = match LlmAdapter::from_config(&config.llm) {
        Ok(adapter) => Some(Arc::new(adapter) as Arc<dyn Generator>),
        Err(e) => {
            debug!("Lookup fallback disabled: {}", e);
            None
        }
    };
    let lookup = KnowledgeLookup::from_config(&config.lookup, fallback);
    let result = lookup.resolve_amount(&args.query, args.amount).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match result.source {
        LookupSource::PrimaryDatabase => println!("🔎 Found in product database"),
        LookupSource::FallbackSearch => println!("🤖 Estimated by fallback search"),
        LookupSource::None => println!("⚠️  Not found"),
    }
    println!("   {}", result.summary);

    Ok(())
}
