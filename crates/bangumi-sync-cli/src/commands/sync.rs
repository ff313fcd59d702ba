use super::config::{load_access_token, load_config};
use super::sync_ui::SyncUI;
use crate::output::Output;
use bangumi_sync_config::{Config, PathManager};
use bangumi_sync_core::{JsonFileStore, JsonlOutbox, PairStatus, RunOutcome, RunSummary, SyncOptions, SyncOrchestrator};
use bangumi_sync_sources::{BangumiSourceFactory, RetryPolicy};
use color_eyre::Result;
use comfy_table::{Cell, Color, Table};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run_sync(
    full_resync: bool,
    subject_types: Vec<u8>,
    collection_types: Vec<u8>,
    workers: Option<usize>,
    output: &Output,
) -> Result<()> {
    tracing::debug!("Sync command started");
    let path_manager = PathManager::default();
    let mut config = load_config(&path_manager)?;

    if !subject_types.is_empty() {
        config.sync.subject_types = subject_types;
    }
    if !collection_types.is_empty() {
        config.sync.collection_types = collection_types;
    }
    if let Some(workers) = workers {
        config.sync.workers = workers;
    }
    if full_resync {
        config.sync.full_resync = true;
    }
    config
        .validate()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;

    let orchestrator = build_orchestrator(&config, &path_manager, output)?;
    let stop = CancellationToken::new();
    spawn_ctrl_c_handler(stop.clone());

    let pairs = orchestrator.options().scopes.len();
    let ui = SyncUI::new(
        format!("Syncing {} pairs for {}...", pairs, config.bangumi.username),
        output.is_human() && !output.is_quiet(),
    );
    let summary = orchestrator.sync(stop).await;
    ui.finish();

    report_summary(&summary, output);
    match &summary.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Partial => {
            output.warn("Some pairs stopped early; the next run resumes them from their saved cursor");
            Ok(())
        }
        RunOutcome::Cancelled => {
            output.warn("Sync cancelled; committed pages are kept");
            Ok(())
        }
        RunOutcome::Aborted { reason } => Err(color_eyre::eyre::eyre!("Sync aborted: {}", reason)),
    }
}

/// Wire the Bangumi source, the file store and the optional outbox into an orchestrator
pub fn build_orchestrator(config: &Config, path_manager: &PathManager, output: &Output) -> Result<SyncOrchestrator> {
    let token = load_access_token(path_manager)?;
    if token.is_none() {
        output.warn("No access token configured; only public collection entries will be synced");
    }

    let factory = BangumiSourceFactory::from_config(config, token);
    let store = JsonFileStore::new(path_manager.store_dir()).map_err(|e| {
        color_eyre::eyre::eyre!("Failed to open store at {}: {}", path_manager.store_dir().display(), e)
    })?;
    let options = SyncOptions::from_config(config).map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let mut orchestrator = SyncOrchestrator::new(Arc::new(factory), Arc::new(store), config.bangumi.username.clone(), options)
        .with_retry_policy(RetryPolicy::from(&config.retry));
    if config.sync.analytics_outbox {
        orchestrator = orchestrator.with_publisher(Arc::new(JsonlOutbox::new(path_manager.outbox_dir())));
    }
    Ok(orchestrator)
}

fn spawn_ctrl_c_handler(stop: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(operation = "cancel", "Interrupt received, stopping after the current step");
            stop.cancel();
        }
    });
}

pub fn report_summary(summary: &RunSummary, output: &Output) {
    if !output.is_human() {
        match serde_json::to_value(summary) {
            Ok(value) => output.json(&value),
            Err(e) => output.error(format!("Failed to encode summary: {}", e)),
        }
        return;
    }
    if output.is_quiet() {
        return;
    }

    println!("{}", summary_table(summary));
    for failure in &summary.failures {
        output.warn(failure);
    }
    let line = format!(
        "{} inserted, {} updated, {} unchanged, {} rejected in {:.1}s",
        summary.inserted(),
        summary.updated(),
        summary.skipped(),
        summary.rejected(),
        summary.elapsed_ms as f64 / 1000.0
    );
    if summary.is_success() {
        output.success(line);
    } else {
        output.info(line);
    }
}

fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec![
        "Category", "Status", "Result", "Pages", "Inserted", "Updated", "Unchanged", "Rejected", "Progress",
    ]);

    for pair in &summary.pairs {
        let (label, color) = match pair.status {
            PairStatus::Complete => ("complete", Color::Green),
            PairStatus::Partial => ("partial", Color::Yellow),
            PairStatus::Failed => ("failed", Color::Red),
        };
        let progress = match (pair.total, pair.completion()) {
            (Some(total), Some(percent)) => format!("{}/{} ({:.0}%)", pair.cursor_offset.min(total), total, percent),
            _ => pair.cursor_offset.to_string(),
        };
        table.add_row(vec![
            Cell::new(pair.scope.subject_type.native_label()),
            Cell::new(pair.scope.collection_type.native_label()),
            Cell::new(label).fg(color),
            Cell::new(pair.pages_fetched),
            Cell::new(pair.inserted),
            Cell::new(pair.updated),
            Cell::new(pair.skipped),
            Cell::new(pair.rejected),
            Cell::new(progress),
        ]);
    }
    table
}
