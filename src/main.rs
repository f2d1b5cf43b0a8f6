use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use inbox_triage::config::TriageConfig;
use inbox_triage::llm::create_gateway;
use inbox_triage::pipeline::{Email, EmailProcessor};
use inbox_triage::prompts::PromptLibrary;
use inbox_triage::store::TriageStore;

const DEFAULT_OUTPUT: &str = "data/processed.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(inbox_path) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: inbox-triage <inbox.json> [output.json]");
        eprintln!("  export OPENROUTER_API_KEY=sk-or-...");
        std::process::exit(2);
    };
    let output_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let config = TriageConfig::from_env().context("loading configuration")?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model_id);
    eprintln!("   Workers: {}", config.max_workers);
    eprintln!("   Output: {}\n", output_path.display());

    let raw = tokio::fs::read_to_string(&inbox_path)
        .await
        .with_context(|| format!("reading inbox {}", inbox_path.display()))?;
    let emails: Vec<Email> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing inbox {}", inbox_path.display()))?;

    let gateway = create_gateway(&config).context("creating model gateway")?;
    let prompts = Arc::new(PromptLibrary::from_config(&config).context("loading prompts")?);
    let store = Arc::new(TriageStore::new());
    store.ingest(emails.iter().cloned()).await;

    let processor = EmailProcessor::new(gateway, prompts, Arc::clone(&store), &config);
    let results = processor.process_batch(emails).await;

    let mut failed = 0;
    for result in &results {
        match result {
            Ok(processed) => eprintln!(
                "   ✓ {}: {} ({} action item(s))",
                processed.email_id,
                processed.category,
                processed.action_items.len()
            ),
            Err(e) => {
                failed += 1;
                eprintln!("   ✗ {}: {}", e.email_id(), e);
            }
        }
    }
    eprintln!(
        "\nProcessed {} email(s): {} succeeded, {} failed",
        results.len(),
        results.len() - failed,
        failed
    );

    store
        .save_snapshot(&output_path)
        .await
        .with_context(|| format!("writing snapshot {}", output_path.display()))?;
    tracing::info!(path = %output_path.display(), "Snapshot written");

    Ok(())
}
