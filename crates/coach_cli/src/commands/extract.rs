//! Extract command - Extract and validate directive blocks.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use coach_directives::{validate, DirectiveExtractor, ValidationContext};

#[derive(Args)]
pub struct ExtractArgs {
    /// File containing a generator reply; stdin when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Also print the display text with all blocks removed
    #[arg(long)]
    strip: bool,
}

pub async fn execute(args: ExtractArgs) -> Result<()> {
    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("file not found or unreadable: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let directives = DirectiveExtractor::extract_all(&text);
    info!("Found {} directive block(s)", directives.len());

    if directives.is_empty() {
        println!("📭 No directive blocks found");
    }

    let ctx = ValidationContext::now();
    let mut failures = 0;
    for directive in &directives {
        match validate(directive, &ctx) {
            Ok(validated) => {
                let actionable = if validated.is_actionable() { "" } else { " (not actionable)" };
                println!("✅ {}{}: {}", validated.kind, actionable, validated.data.summary());
                println!("{}", serde_json::to_string_pretty(&validated.to_record()?)?);
            }
            Err(e) => {
                failures += 1;
                println!("❌ {}", e);
            }
        }
    }

    if args.strip {
        println!();
        println!("📝 Display text:");
        println!("{}", DirectiveExtractor::strip_all(&text));
    }

    if failures > 0 {
        anyhow::bail!("{} directive(s) failed validation", failures);
    }

    Ok(())
}
