//! promptpool
//!
//! Batch text generation against OpenAI-compatible completion services:
//! 1. Reads a JSONL task file, skipping ids already recorded
//! 2. Dispatches prompts across a credential pool with bounded concurrency
//! 3. Appends each result as it lands, null when every attempt failed
//! 4. Compacts the result file and reports how many tasks failed

mod cli;
mod config;
mod progress;
mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use completion::{ChatClient, Prompt};
use dispatch::{DispatchOptions, Dispatcher, Outcome, ProgressReporter, ResultSink};
use keypool::KeyPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::KeyConfig;
use crate::progress::ConsoleProgress;
use crate::store::JsonlSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only generated text (`ask`).
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            output,
            config,
            concurrency,
            max_retries,
            cooldown_secs,
        } => {
            let opts = DispatchOptions {
                concurrency,
                max_retries,
                cooldown: Duration::from_secs(cooldown_secs),
            };
            run_batch(&input, &output, config.as_deref(), opts).await
        }
        Commands::Ask {
            instruction,
            text,
            config,
        } => ask(&instruction, &text, config.as_deref()).await,
        Commands::Merge {
            input,
            output,
            merged,
        } => merge(&input, &output, &merged).await,
    }
}

async fn run_batch(
    input: &Path,
    output: &Path,
    config_flag: Option<&Path>,
    opts: DispatchOptions,
) -> Result<()> {
    let config = load_config(config_flag)?;

    let tasks = store::read_tasks(input)
        .await
        .with_context(|| format!("failed to read tasks from {}", input.display()))?;
    if tasks.is_empty() {
        bail!("no tasks in {}", input.display());
    }

    let sink = JsonlSink::open(output)
        .await
        .with_context(|| format!("failed to open result file {}", output.display()))?;

    let total = tasks.len() as u64;
    let already = tasks
        .keys()
        .filter(|id| sink.completed().contains(id))
        .count() as u64;
    let progress = ConsoleProgress::new(total, already);

    let dispatcher = build_dispatcher(&config, opts)?;
    let run = dispatcher.run(tasks, &sink, &progress).await;
    progress.finish();
    let outcomes = run?;

    store::compact(output)
        .await
        .with_context(|| format!("failed to compact {}", output.display()))?;

    if outcomes.is_empty() {
        info!("all tasks were already recorded");
        return Ok(());
    }

    let failed = store::count_nulls(output)
        .await
        .with_context(|| format!("failed to re-read {}", output.display()))?;
    if failed == 0 {
        info!(completed = outcomes.len(), "all tasks completed");
    } else {
        warn!(failed, "tasks recorded null outputs; rerun to retry them");
    }

    let counts = dispatcher.pool_counts().await;
    if counts.removed > 0 {
        warn!(
            removed = counts.removed,
            "credentials were removed for exhausted quota"
        );
    }
    Ok(())
}

async fn ask(instruction: &str, text: &str, config_flag: Option<&Path>) -> Result<()> {
    let config = load_config(config_flag)?;

    let opts = DispatchOptions::default();
    let max_retries = opts.max_retries;
    let dispatcher = build_dispatcher(&config, opts)?;

    let prompt = Prompt::new(instruction, text);
    let mut outcomes = dispatcher
        .run(BTreeMap::from([(0, prompt)]), &DiscardSink, &SilentProgress)
        .await?;

    match outcomes.remove(&0) {
        Some(Outcome::Success(text)) => {
            println!("{text}");
            Ok(())
        }
        Some(Outcome::PermanentFailure(reason)) => bail!("request failed: {reason}"),
        Some(Outcome::RetriesExhausted) => {
            bail!("no completion after {max_retries} attempts")
        }
        None => bail!("request produced no outcome"),
    }
}

async fn merge(input: &Path, output: &Path, merged: &Path) -> Result<()> {
    let count = store::merge(input, output, merged)
        .await
        .with_context(|| {
            format!(
                "failed to merge {} with {}",
                input.display(),
                output.display()
            )
        })?;
    info!(records = count, merged = %merged.display(), "wrote merged file");
    Ok(())
}

fn load_config(flag: Option<&Path>) -> Result<KeyConfig> {
    let path = config::resolve_path(flag);
    let loaded = KeyConfig::load(&path)
        .with_context(|| format!("failed to load key config from {}", path.display()))?;
    info!(
        config = %path.display(),
        keys = loaded.api_keys.len(),
        model = %loaded.model.name,
        "loaded key config"
    );
    Ok(loaded)
}

fn build_dispatcher(config: &KeyConfig, opts: DispatchOptions) -> Result<Dispatcher> {
    let pool = Arc::new(KeyPool::new(config.keys()));
    let client = Arc::new(
        ChatClient::new(
            config.api_base.as_deref(),
            config.model.clone(),
            config.request_timeout(),
        )
        .context("failed to build completion client")?,
    );
    Ok(Dispatcher::new(client, pool, opts))
}

/// Sink for `ask`: the one-off result is printed, never persisted.
struct DiscardSink;

impl ResultSink for DiscardSink {
    fn existing_ids<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = common::Result<BTreeSet<u64>>> + Send + 'a>> {
        Box::pin(async { Ok(BTreeSet::new()) })
    }

    fn append<'a>(
        &'a self,
        _id: u64,
        _text: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = common::Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn advance(&self, _n: u64) {}
}
