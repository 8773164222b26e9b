mod config;
mod embeddings;
mod error;
mod item;
mod logging;
mod mail;
mod pipeline;
mod settings;
mod similarity;
mod store;

use anyhow::Context;

use crate::embeddings::engine::EmbeddingEngine;
use crate::embeddings::Embedder;
use crate::mail::gmail::GmailClient;
use crate::pipeline::{Pipeline, PipelineOptions, RunSummary};
use crate::settings::{Command, Settings};
use crate::store::memory::MemoryStore;
use crate::store::notion::NotionStore;
use crate::store::ItemStore;

fn main() {
    if let Err(e) = real_main() {
        eprintln!("[mailvec] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Settings are validated before the logger starts so bad invocations fail fast
    // without touching the home directory.
    let settings = match settings::parse(&args, |k| std::env::var(k).ok())? {
        Command::Version => {
            println!("mailvec {}", config::HOST_VERSION);
            return Ok(());
        }
        Command::Help => {
            print!("{}", settings::USAGE);
            return Ok(());
        }
        Command::Run(s) => s,
    };

    let _logger = logging::init_logging()?;
    log::info!(
        "Query: {:?}, threshold={}, skipDuplicates={}, dryRun={}, maxItems={:?}",
        settings.query,
        settings.threshold,
        settings.skip_on_duplicate,
        settings.dry_run,
        settings.max_items
    );

    // The model is the one long-lived resource: loaded once here and lent to the pipeline.
    let model_dir = embeddings::download::ensure_model_files(&settings.model_base_url)?;
    let engine = EmbeddingEngine::load(&model_dir)?;
    log::info!("Embedding model ready: {} ({} dims)", engine.model_name(), engine.dims());

    let summary = run_pipeline(&settings, &engine)?;

    for f in &summary.failures {
        log::warn!("Failed: {} ({}): {}", f.item_id, f.kind, f.message);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed serializing run summary")?
    );

    log::info!("=== mailvec finished ===");
    Ok(())
}

fn run_pipeline(settings: &Settings, engine: &EmbeddingEngine) -> anyhow::Result<RunSummary> {
    let source = GmailClient::new(settings.gmail_token.clone());
    let options = PipelineOptions {
        threshold: settings.threshold,
        skip_on_duplicate: settings.skip_on_duplicate,
        max_items: settings.max_items,
    };

    if settings.dry_run {
        // Read the real corpus once, then let every write land in memory.
        let corpus = match &settings.notion {
            Some(creds) => NotionStore::new(creds.api_key.clone(), creds.database_id.clone())
                .query_all()
                .context("failed reading Notion corpus for dry run")?,
            None => {
                log::warn!("Dry run without Notion credentials: comparing against an empty corpus");
                Vec::new()
            }
        };
        let mut store = MemoryStore::from_items(corpus);
        let summary = Pipeline::new(&source, &mut store, engine, options).run(&settings.query)?;
        log::info!("Dry run: {} items would have been stored", store.inserted_count());
        return Ok(summary);
    }

    let creds = settings
        .notion
        .clone()
        .context("Notion credentials missing. Set NOTION_API_KEY and NOTION_DATABASE_ID.")?;
    let mut store = NotionStore::new(creds.api_key, creds.database_id);
    let summary = Pipeline::new(&source, &mut store, engine, options).run(&settings.query)?;
    Ok(summary)
}
